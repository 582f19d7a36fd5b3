//! The `null` codec: accepts PCM and emits nothing. Used only for stream
//! composition (spec.md §4.2) — e.g. a muted group member still needs an
//! active encoder slot so the hub's per-session bookkeeping stays uniform,
//! without actually shipping any bytes.

use bytes::Bytes;

use crate::chunk::PcmChunk;
use crate::codecs::{EncodedChunk, Encoder};
use crate::error::SnapResult;

pub struct NullEncoder;

impl Encoder for NullEncoder {
    fn codec_name(&self) -> &'static str {
        "null"
    }

    fn header(&self) -> Bytes {
        Bytes::new()
    }

    fn encode(&mut self, _chunk: &PcmChunk) -> SnapResult<Vec<EncodedChunk>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_format::SampleFormat;
    use crate::wire::time::WallClock;

    #[test]
    fn drops_every_chunk() {
        let fmt = SampleFormat::default();
        let payload = vec![0u8; fmt.frame_size() as usize * 100];
        let chunk = PcmChunk::new(fmt, Bytes::from(payload), WallClock::from_micros(0)).unwrap();
        let mut encoder = NullEncoder;
        assert!(encoder.encode(&chunk).unwrap().is_empty());
    }
}
