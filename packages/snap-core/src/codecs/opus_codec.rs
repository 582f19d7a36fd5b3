//! The `opus` codec. Grounded on
//! `original_source/server/encoder/opus_encoder.cpp` (pseudo-header layout,
//! greedy chunk-duration ladder, stereo-only restriction, remainder
//! buffering) and SPEC_FULL.md §4.2's supplement (the `rubato` resampler
//! filling in the original's deferred "resamples internally" detail).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use opus::{Application, Channels};

use crate::chunk::PcmChunk;
use crate::codecs::{Decoder, EncodedChunk, Encoder};
use crate::error::{SnapError, SnapResult};
use crate::sample_format::SampleFormat;
use crate::wire::time::WallClock;

const OPUS_MAGIC: u32 = 0x4F50_5553; // "OPUS" packed big-endian, per the original pseudo-header.
const MIN_BITRATE: i32 = 6_000;
const MAX_BITRATE: i32 = 512_000;
const CHUNK_DURATIONS_MS: [u32; 4] = [60, 40, 20, 10];
const MIN_CHUNK_MS: u32 = 10;
const OPUS_FORMAT: SampleFormat = SampleFormat::new(48_000, 16, 2);

/// Parsed `"BITRATE:<n|MAX|AUTO>,COMPLEXITY:<1-10>"` codec options.
struct OpusOptions {
    bitrate: opus::Bitrate,
    complexity: i32,
}

fn parse_options(options: &str) -> SnapResult<OpusOptions> {
    let mut bitrate = opus::Bitrate::Bits(192_000);
    let mut complexity = 10;
    for option in options.split(',').filter(|s| !s.is_empty()) {
        let mut kv = option.splitn(2, ':');
        let (key, value) = (kv.next().unwrap_or(""), kv.next().unwrap_or(""));
        match key {
            "BITRATE" => {
                bitrate = match value {
                    "MAX" => opus::Bitrate::Max,
                    "AUTO" => opus::Bitrate::Auto,
                    n => {
                        let n: i32 = n.parse().map_err(|_| {
                            SnapError::Config(format!("opus: invalid bitrate {n}"))
                        })?;
                        if !(MIN_BITRATE..=MAX_BITRATE).contains(&n) {
                            return Err(SnapError::Config(format!(
                                "opus bitrate must be between {MIN_BITRATE} and {MAX_BITRATE}"
                            )));
                        }
                        opus::Bitrate::Bits(n)
                    }
                };
            }
            "COMPLEXITY" => {
                let n: i32 = value
                    .parse()
                    .map_err(|_| SnapError::Config(format!("opus: invalid complexity {value}")))?;
                if !(1..=10).contains(&n) {
                    return Err(SnapError::Config("opus complexity must be between 1 and 10".into()));
                }
                complexity = n;
            }
            "" => {}
            other => return Err(SnapError::Config(format!("opus: unknown option {other}"))),
        }
    }
    Ok(OpusOptions { bitrate, complexity })
}

fn opus_pseudo_header(format: SampleFormat) -> Bytes {
    let mut buf = BytesMut::with_capacity(12);
    buf.put_u32(OPUS_MAGIC);
    buf.put_u32(format.rate());
    buf.put_u16(format.bits());
    buf.put_u16(format.channels());
    buf.freeze()
}

/// Converts interleaved PCM bytes at an arbitrary sample size into
/// interleaved `i16` samples, truncating wider containers to their top 16
/// bits the way the FLAC encoder's `clip` path does for narrower ones.
fn bytes_to_i16(payload: &[u8], sample_size: u16) -> Vec<i16> {
    match sample_size {
        1 => payload.iter().map(|&b| ((b as i16) - 128) << 8).collect(),
        2 => payload
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect(),
        4 => payload
            .chunks_exact(4)
            .map(|c| (i32::from_le_bytes([c[0], c[1], c[2], c[3]]) >> 16) as i16)
            .collect(),
        _ => Vec::new(),
    }
}

fn i16_to_bytes(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for s in samples {
        buf.put_i16_le(*s);
    }
    buf.freeze()
}

/// Resamples interleaved stereo `i16` PCM to 48 kHz using a windowed-sinc
/// filter, only when the input isn't already 48 kHz.
struct Resampler {
    inner: Option<rubato::SincFixedIn<f64>>,
}

impl Resampler {
    fn new(input_rate: u32, output_rate: u32, channels: usize) -> SnapResult<Self> {
        if input_rate == output_rate {
            return Ok(Self { inner: None });
        }
        let params = rubato::SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: rubato::SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: rubato::WindowFunction::BlackmanHarris2,
        };
        let resampler = rubato::SincFixedIn::<f64>::new(
            f64::from(output_rate) / f64::from(input_rate),
            2.0,
            params,
            1024,
            channels,
        )
        .map_err(|e| SnapError::Decode {
            codec: "opus",
            message: format!("failed to build resampler: {e}"),
        })?;
        Ok(Self {
            inner: Some(resampler),
        })
    }

    fn process(&mut self, interleaved: &[i16], channels: usize) -> SnapResult<Vec<i16>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(interleaved.to_vec());
        };
        let mut deinterleaved: Vec<Vec<f64>> = vec![Vec::new(); channels];
        for (i, &s) in interleaved.iter().enumerate() {
            deinterleaved[i % channels].push(f64::from(s) / f64::from(i16::MAX));
        }
        let out = rubato::Resampler::process(resampler, &deinterleaved, None).map_err(|e| {
            SnapError::Decode {
                codec: "opus",
                message: format!("resample failed: {e}"),
            }
        })?;
        let frames = out[0].len();
        let mut interleaved_out = Vec::with_capacity(frames * channels);
        for frame in 0..frames {
            for ch in out.iter().take(channels) {
                let v = (ch[frame] * f64::from(i16::MAX)).clamp(f64::from(i16::MIN), f64::from(i16::MAX));
                interleaved_out.push(v as i16);
            }
        }
        Ok(interleaved_out)
    }
}

pub struct OpusEncoder {
    input_format: SampleFormat,
    encoder: opus::Encoder,
    resampler: Resampler,
    remainder: Vec<i16>,
    remainder_max_samples: usize,
    /// Wall-clock time of `remainder`'s first sample, set when a call leaves
    /// unconsumed output buffered for the next one.
    remainder_start: Option<WallClock>,
}

impl OpusEncoder {
    pub fn new(format: SampleFormat, options: &str) -> SnapResult<Self> {
        if format.channels() != 2 {
            return Err(SnapError::Config("opus requires a stereo signal".into()));
        }
        let opts = parse_options(options)?;

        let mut encoder = opus::Encoder::new(OPUS_FORMAT.rate(), Channels::Stereo, Application::Audio)
            .map_err(|e| SnapError::Config(format!("failed to initialize opus encoder: {e}")))?;
        encoder
            .set_bitrate(opts.bitrate)
            .map_err(|e| SnapError::Config(format!("failed to set opus bitrate: {e}")))?;
        encoder
            .set_complexity(opts.complexity)
            .map_err(|e| SnapError::Config(format!("failed to set opus complexity: {e}")))?;

        let resampler = Resampler::new(format.rate(), OPUS_FORMAT.rate(), 2)?;
        let remainder_max_samples =
            OPUS_FORMAT.ms_to_frames(f64::from(MIN_CHUNK_MS)) as usize * OPUS_FORMAT.channels() as usize;

        Ok(Self {
            input_format: format,
            encoder,
            resampler,
            remainder: Vec::with_capacity(remainder_max_samples),
            remainder_max_samples,
            remainder_start: None,
        })
    }

    /// Encodes exactly `bytes` worth of 48 kHz stereo `i16` samples (already
    /// on an encodable boundary) into one output chunk.
    fn encode_samples(&mut self, samples: &[i16], start: WallClock) -> SnapResult<EncodedChunk> {
        let frames_per_channel = samples.len() / 2;
        let mut out = vec![0u8; samples.len() * 2 + 256];
        let len = self
            .encoder
            .encode(samples, &mut out)
            .map_err(|e| SnapError::Decode {
                codec: "opus",
                message: format!("encode failed: {e}"),
            })?;
        out.truncate(len);
        Ok(EncodedChunk {
            payload: Bytes::from(out),
            timestamp: start,
            duration_ms: f64::from(frames_per_channel as u32) / f64::from(OPUS_FORMAT.ms_rate()),
        })
    }
}

impl Encoder for OpusEncoder {
    fn codec_name(&self) -> &'static str {
        "opus"
    }

    fn header(&self) -> Bytes {
        opus_pseudo_header(OPUS_FORMAT)
    }

    fn encode(&mut self, chunk: &PcmChunk) -> SnapResult<Vec<EncodedChunk>> {
        let i16_samples = bytes_to_i16(chunk.remaining_bytes(), self.input_format.sample_size());
        let resampled = self.resampler.process(&i16_samples, 2)?;

        let mut cursor = 0usize;
        // Tracks the wall-clock start of `resampled[cursor..]` — i.e. of this
        // *input* chunk's own timeline, never of previously buffered remainder
        // samples, which carry their own `remainder_start`.
        let mut start = chunk.start();
        let mut results = Vec::new();

        if !self.remainder.is_empty() {
            let take = (self.remainder_max_samples - self.remainder.len()).min(resampled.len());
            let remainder_start = self.remainder_start.unwrap_or(start);
            self.remainder.extend_from_slice(&resampled[..take]);
            cursor += take;
            start = start + i64::from(OPUS_FORMAT.frames_to_us((take / 2) as u32));

            if self.remainder.len() < self.remainder_max_samples {
                self.remainder_start = Some(remainder_start);
                return Ok(results);
            }
            let remainder = std::mem::take(&mut self.remainder);
            self.remainder_start = None;
            results.push(self.encode_samples(&remainder, remainder_start)?);
        }

        for duration_ms in CHUNK_DURATIONS_MS {
            let samples_needed = OPUS_FORMAT.ms_to_frames(f64::from(duration_ms)) as usize * 2;
            while resampled.len() - cursor >= samples_needed {
                let slice = &resampled[cursor..cursor + samples_needed];
                results.push(self.encode_samples(slice, start)?);
                start = start + i64::from(OPUS_FORMAT.frames_to_us((samples_needed / 2) as u32));
                cursor += samples_needed;
            }
            if cursor == resampled.len() {
                break;
            }
        }

        if cursor < resampled.len() {
            self.remainder_start = Some(start);
            self.remainder.extend_from_slice(&resampled[cursor..]);
        }

        Ok(results)
    }
}

pub struct OpusDecoder {
    decoder: Option<opus::Decoder>,
}

impl OpusDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self { decoder: None }
    }
}

impl Default for OpusDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for OpusDecoder {
    fn set_header(&mut self, header: &[u8]) -> SnapResult<SampleFormat> {
        let mut bytes = Bytes::copy_from_slice(header);
        if bytes.len() < 12 {
            return Err(SnapError::Protocol("truncated opus header".into()));
        }
        let magic = bytes.get_u32();
        if magic != OPUS_MAGIC {
            return Err(SnapError::Protocol("bad opus pseudo-header magic".into()));
        }
        let rate = bytes.get_u32();
        let bits = bytes.get_u16();
        let channels = bytes.get_u16();
        self.decoder = Some(
            opus::Decoder::new(rate, Channels::Stereo)
                .map_err(|e| SnapError::Decode {
                    codec: "opus",
                    message: format!("failed to initialize opus decoder: {e}"),
                })?,
        );
        Ok(SampleFormat::new(rate, bits, channels))
    }

    fn decode(&mut self, payload: &[u8], timestamp: WallClock) -> SnapResult<PcmChunk> {
        let decoder = self.decoder.as_mut().ok_or_else(|| SnapError::Decode {
            codec: "opus",
            message: "decode called before set_header".into(),
        })?;
        let mut out = vec![0i16; 5760 * 2]; // max opus frame: 120ms @ 48kHz stereo
        let frames = decoder
            .decode(payload, &mut out, false)
            .map_err(|e| SnapError::Decode {
                codec: "opus",
                message: format!("decode failed: {e}"),
            })?;
        out.truncate(frames * 2);
        PcmChunk::new(OPUS_FORMAT, i16_to_bytes(&out), timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mono_input() {
        let err = OpusEncoder::new(SampleFormat::new(48_000, 16, 1), "").unwrap_err();
        assert!(matches!(err, SnapError::Config(_)));
    }

    #[test]
    fn parses_bitrate_and_complexity() {
        let opts = parse_options("BITRATE:192000,COMPLEXITY:5").unwrap();
        assert!(matches!(opts.bitrate, opus::Bitrate::Bits(192_000)));
        assert_eq!(opts.complexity, 5);
    }

    #[test]
    fn parses_max_and_auto_bitrate() {
        assert!(matches!(
            parse_options("BITRATE:MAX").unwrap().bitrate,
            opus::Bitrate::Max
        ));
        assert!(matches!(
            parse_options("BITRATE:AUTO").unwrap().bitrate,
            opus::Bitrate::Auto
        ));
    }

    #[test]
    fn rejects_out_of_range_bitrate() {
        assert!(parse_options("BITRATE:1000").is_err());
        assert!(parse_options("BITRATE:1000000").is_err());
    }

    #[test]
    fn rejects_out_of_range_complexity() {
        assert!(parse_options("COMPLEXITY:0").is_err());
        assert!(parse_options("COMPLEXITY:11").is_err());
    }

    #[test]
    fn pseudo_header_is_12_bytes_big_endian() {
        let header = opus_pseudo_header(SampleFormat::new(48_000, 16, 2));
        assert_eq!(header.len(), 12);
        assert_eq!(&header[0..4], &0x4F50_5553u32.to_be_bytes());
    }

    #[test]
    fn bytes_to_i16_roundtrips_16bit() {
        let samples: Vec<i16> = vec![1234, -5678, 0, 32000];
        let bytes = i16_to_bytes(&samples);
        assert_eq!(bytes_to_i16(&bytes, 2), samples);
    }
}
