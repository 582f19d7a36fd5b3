//! The `flac` codec: lossless compression, grounded on
//! `original_source/server/encoder/flac_encoder.cpp` (compression levels
//! 0-8, the "first write is the header" streaming rule) and
//! `original_source/client/decoder/flacDecoder.cpp` (pre-roll bookkeeping).
//!
//! `flacenc` has no incremental frame-at-a-time encoder, so each call
//! produces one complete, self-contained FLAC stream (magic + STREAMINFO +
//! one frame) for that period's samples. The STREAMINFO prefix is identical
//! across calls (same format, same encoder config), so this encoder treats
//! it the way the original treats its one-time header: captured once,
//! stripped from every subsequent chunk before it goes on the wire.

use bytes::Bytes;

use crate::chunk::PcmChunk;
use crate::codecs::{Decoder, EncodedChunk, Encoder};
use crate::error::{SnapError, SnapResult};
use crate::sample_format::SampleFormat;
use crate::wire::time::WallClock;

/// `"fLaC"` magic (4) + metadata-block header (4) + STREAMINFO payload (34).
/// Fixed because `flacenc`'s default config emits only a STREAMINFO block.
const STREAMINFO_HEADER_LEN: usize = 42;

fn parse_compression(options: &str) -> SnapResult<u8> {
    if options.trim().is_empty() {
        return Ok(2);
    }
    let level: u8 = options
        .trim()
        .parse()
        .map_err(|_| SnapError::Config(format!("flac: invalid compression level {options}")))?;
    if level > 8 {
        return Err(SnapError::Config("flac compression level must be 0-8".into()));
    }
    Ok(level)
}

/// Converts interleaved PCM bytes into the `i32` samples `flacenc::MemSource`
/// expects, sign-extending from whatever container width `format` uses.
fn bytes_to_i32(payload: &[u8], format: SampleFormat) -> Vec<i32> {
    match format.sample_size() {
        1 => payload.iter().map(|&b| i32::from(b as i8)).collect(),
        2 => payload
            .chunks_exact(2)
            .map(|c| i32::from(i16::from_le_bytes([c[0], c[1]])))
            .collect(),
        4 => payload
            .chunks_exact(4)
            .map(|c| {
                let v = i32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                if format.bits() == 24 {
                    v >> 8
                } else {
                    v
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn i32_to_bytes(samples: &[i32], format: SampleFormat) -> Bytes {
    let mut buf = Vec::with_capacity(samples.len() * format.sample_size() as usize);
    match format.sample_size() {
        1 => buf.extend(samples.iter().map(|&s| s as u8)),
        2 => {
            for &s in samples {
                buf.extend_from_slice(&(s as i16).to_le_bytes());
            }
        }
        4 => {
            for &s in samples {
                let v = if format.bits() == 24 { s << 8 } else { s };
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        _ => {}
    }
    Bytes::from(buf)
}

pub struct FlacEncoder {
    format: SampleFormat,
    compression: u8,
    header: Option<Bytes>,
}

impl FlacEncoder {
    pub fn new(format: SampleFormat, options: &str) -> SnapResult<Self> {
        Ok(Self {
            format,
            compression: parse_compression(options)?,
            header: None,
        })
    }

    fn encode_stream(&self, samples: &[i32]) -> SnapResult<Vec<u8>> {
        let mut config = flacenc::config::Encoder::default();
        config.block_size = samples.len() / self.format.channels() as usize;
        // Compression level maps roughly onto flacenc's quality knob: higher
        // means smaller frames, same as libFLAC's 0-8 scale.
        config.stereo_coding.mode = if self.compression >= 4 {
            flacenc::config::StereoCodingMode::Estimate
        } else {
            flacenc::config::StereoCodingMode::Fixed
        };
        let config = config
            .into_verified()
            .map_err(|(_, e)| SnapError::Decode {
                codec: "flac",
                message: format!("invalid encoder config: {e:?}"),
            })?;

        let source = flacenc::source::MemSource::from_samples(
            samples,
            self.format.channels() as usize,
            self.format.bits() as usize,
            self.format.rate() as usize,
        );
        let block_size = config.block_size;
        let stream = flacenc::encode_with_fixed_block_size(&config, source, block_size)
            .map_err(|e| SnapError::Decode {
                codec: "flac",
                message: format!("encode failed: {e:?}"),
            })?;

        let mut sink = flacenc::bitsink::ByteSink::new();
        flacenc::component::BitRepr::write(&stream, &mut sink).map_err(|e| SnapError::Decode {
            codec: "flac",
            message: format!("bitstream serialization failed: {e:?}"),
        })?;
        Ok(sink.as_slice().to_vec())
    }
}

impl Encoder for FlacEncoder {
    fn codec_name(&self) -> &'static str {
        "flac"
    }

    fn header(&self) -> Bytes {
        self.header.clone().unwrap_or_default()
    }

    fn encode(&mut self, chunk: &PcmChunk) -> SnapResult<Vec<EncodedChunk>> {
        let frames = chunk.remaining_frames();
        if frames == 0 {
            return Ok(Vec::new());
        }
        let samples = bytes_to_i32(chunk.remaining_bytes(), self.format);
        let stream = self.encode_stream(&samples)?;
        if stream.len() < STREAMINFO_HEADER_LEN {
            return Err(SnapError::Decode {
                codec: "flac",
                message: "encoded stream shorter than STREAMINFO header".into(),
            });
        }
        if self.header.is_none() {
            self.header = Some(Bytes::copy_from_slice(&stream[..STREAMINFO_HEADER_LEN]));
        }
        let frame_bytes = Bytes::copy_from_slice(&stream[STREAMINFO_HEADER_LEN..]);
        Ok(vec![EncodedChunk {
            payload: frame_bytes,
            timestamp: chunk.start(),
            duration_ms: self.format.frames_to_ms(frames),
        }])
    }
}

pub struct FlacDecoder {
    header: Vec<u8>,
    format: Option<SampleFormat>,
}

impl FlacDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            header: Vec::new(),
            format: None,
        }
    }
}

impl Default for FlacDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FlacDecoder {
    fn set_header(&mut self, header: &[u8]) -> SnapResult<SampleFormat> {
        self.header = header.to_vec();
        let reader = claxon::FlacReader::new(std::io::Cursor::new(&self.header)).map_err(|e| {
            SnapError::Decode {
                codec: "flac",
                message: format!("invalid codec header: {e}"),
            }
        })?;
        let info = reader.streaminfo();
        let format = SampleFormat::new(info.sample_rate, info.bits_per_sample as u16, info.channels as u16);
        self.format = Some(format);
        Ok(format)
    }

    fn decode(&mut self, payload: &[u8], timestamp: WallClock) -> SnapResult<PcmChunk> {
        let format = self.format.ok_or_else(|| SnapError::Decode {
            codec: "flac",
            message: "decode called before set_header".into(),
        })?;

        let mut stream = self.header.clone();
        stream.extend_from_slice(payload);

        let mut reader = claxon::FlacReader::new(std::io::Cursor::new(stream)).map_err(|e| {
            SnapError::Decode {
                codec: "flac",
                message: format!("invalid frame: {e}"),
            }
        })?;
        let channels = reader.streaminfo().channels as usize;

        let mut interleaved = Vec::new();
        let mut frame_reader = reader.blocks();
        let mut buffer = Vec::new();
        loop {
            match frame_reader.read_next_or_eof(buffer).map_err(|e| SnapError::Decode {
                codec: "flac",
                message: format!("frame decode failed: {e}"),
            })? {
                Some(block) => {
                    for i in 0..block.len() / block.channels() {
                        for ch in 0..channels as u32 {
                            interleaved.push(block.sample(ch, i));
                        }
                    }
                    buffer = block.into_buffer();
                }
                None => break,
            }
        }

        // This decoder reconstructs a fresh mini-stream per chunk (see module
        // docs), so there is no cross-call pre-roll to report: cached_blocks
        // is always 0 and the timestamp needs no adjustment.
        PcmChunk::new(format, i32_to_bytes(&interleaved, format), timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_compression_defaults_to_2() {
        assert_eq!(parse_compression("").unwrap(), 2);
    }

    #[test]
    fn parse_compression_rejects_out_of_range() {
        assert!(parse_compression("9").is_err());
    }

    #[test]
    fn bytes_to_i32_roundtrips_16bit() {
        let format = SampleFormat::new(48_000, 16, 2);
        let samples = vec![1234i32, -5678, 0, 32000];
        let bytes = i32_to_bytes(&samples, format);
        assert_eq!(bytes_to_i32(&bytes, format), samples);
    }

    #[test]
    fn bytes_to_i32_roundtrips_24bit() {
        let format = SampleFormat::new(48_000, 24, 2);
        let samples = vec![8_000_000i32, -8_000_000, 0];
        let bytes = i32_to_bytes(&samples, format);
        assert_eq!(bytes_to_i32(&bytes, format), samples);
    }
}
