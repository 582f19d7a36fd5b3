//! The `pcm` codec: a no-op passthrough. Grounded on
//! `original_source/client/decoder/pcmDecoder.cpp`, which does nothing but
//! hand the payload back unchanged, and the equivalent encoder, which emits
//! the input chunk as a single output chunk with an empty header.

use bytes::Bytes;

use crate::chunk::PcmChunk;
use crate::codecs::{Decoder, EncodedChunk, Encoder};
use crate::error::SnapResult;
use crate::sample_format::SampleFormat;
use crate::wire::time::WallClock;

/// Passthrough encoder: every PCM period becomes exactly one encoded chunk
/// with identical bytes.
pub struct PcmEncoder {
    format: SampleFormat,
}

impl PcmEncoder {
    #[must_use]
    pub fn new(format: SampleFormat) -> Self {
        Self { format }
    }
}

impl Encoder for PcmEncoder {
    fn codec_name(&self) -> &'static str {
        "pcm"
    }

    fn header(&self) -> Bytes {
        Bytes::new()
    }

    fn encode(&mut self, chunk: &PcmChunk) -> SnapResult<Vec<EncodedChunk>> {
        let frames = chunk.remaining_frames();
        if frames == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![EncodedChunk {
            payload: Bytes::copy_from_slice(chunk.remaining_bytes()),
            timestamp: chunk.start(),
            duration_ms: self.format.frames_to_ms(frames),
        }])
    }
}

/// Passthrough decoder: the payload already *is* PCM. `set_header` accepts
/// an empty header and keeps whatever `SampleFormat` was negotiated
/// separately (the PCM codec carries no format info of its own, per
/// spec.md §3's `SampleFormat` message).
pub struct PcmDecoder {
    format: SampleFormat,
}

impl PcmDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            format: SampleFormat::default(),
        }
    }
}

impl Default for PcmDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PcmDecoder {
    fn set_header(&mut self, _header: &[u8]) -> SnapResult<SampleFormat> {
        Ok(self.format)
    }

    fn decode(&mut self, payload: &[u8], timestamp: WallClock) -> SnapResult<PcmChunk> {
        PcmChunk::new(self.format, Bytes::copy_from_slice(payload), timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> SampleFormat {
        SampleFormat::new(48_000, 16, 2)
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let fmt = format();
        let payload = vec![0u8; fmt.frame_size() as usize * 480];
        let ts = WallClock::from_sec_usec(1, 0);
        let chunk = PcmChunk::new(fmt, Bytes::from(payload.clone()), ts).unwrap();

        let mut encoder = PcmEncoder::new(fmt);
        let encoded = encoder.encode(&chunk).unwrap();
        assert_eq!(encoded.len(), 1);
        assert_eq!(encoded[0].payload.as_ref(), payload.as_slice());
        assert_eq!(encoded[0].timestamp, ts);

        let mut decoder = PcmDecoder::new();
        decoder.format = fmt;
        let decoded = decoder.decode(&encoded[0].payload, encoded[0].timestamp).unwrap();
        assert_eq!(decoded.remaining_bytes(), payload.as_slice());
        assert_eq!(decoded.start(), ts);
    }

    #[test]
    fn empty_chunk_encodes_to_nothing() {
        let fmt = format();
        let chunk = PcmChunk::new(fmt, Bytes::new(), WallClock::from_micros(0)).unwrap();
        let mut encoder = PcmEncoder::new(fmt);
        assert!(encoder.encode(&chunk).unwrap().is_empty());
    }
}
