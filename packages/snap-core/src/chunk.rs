//! `PcmChunk`: a period's worth of PCM audio with a start timestamp and a
//! frame-granular read cursor.
//!
//! A chunk's `idx` cursor tracks how many frames have already been consumed
//! from its front (used by the jitter buffer to seek partway into a chunk
//! without copying). `start()`/`end()` derive the wall-clock span of the
//! *remaining* frames from the cursor and the chunk's [`SampleFormat`].

use bytes::Bytes;

use crate::error::{SnapError, SnapResult};
use crate::sample_format::SampleFormat;
use crate::wire::time::WallClock;

/// A contiguous block of PCM frames tagged with its origin timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    format: SampleFormat,
    payload: Bytes,
    /// Wall-clock time of frame 0 in `payload` (not of `idx`).
    timestamp: WallClock,
    /// Frames already consumed from the front, in `[0, frame_count]`.
    idx: u32,
}

impl PcmChunk {
    /// Builds a chunk, validating that `payload` holds a whole number of
    /// frames.
    pub fn new(format: SampleFormat, payload: Bytes, timestamp: WallClock) -> SnapResult<Self> {
        let frame_size = format.frame_size();
        if frame_size == 0 || payload.len() % frame_size != 0 {
            return Err(SnapError::Protocol(format!(
                "payload size {} is not a multiple of frame size {frame_size}",
                payload.len()
            )));
        }
        Ok(Self {
            format,
            payload,
            timestamp,
            idx: 0,
        })
    }

    #[must_use]
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Total frames originally carried by this chunk (including consumed ones).
    #[must_use]
    pub fn frame_count(&self) -> u32 {
        (self.payload.len() / self.format.frame_size()) as u32
    }

    /// Frames remaining to be read from the front.
    #[must_use]
    pub fn remaining_frames(&self) -> u32 {
        self.frame_count() - self.idx
    }

    #[must_use]
    pub fn idx(&self) -> u32 {
        self.idx
    }

    /// Wall-clock time of the next unread frame.
    #[must_use]
    pub fn start(&self) -> WallClock {
        self.timestamp + self.format.frames_to_us(self.idx)
    }

    /// Wall-clock time just past the last frame in this chunk.
    #[must_use]
    pub fn end(&self) -> WallClock {
        self.timestamp + self.format.frames_to_us(self.frame_count())
    }

    /// Bytes of the unread portion of this chunk.
    #[must_use]
    pub fn remaining_bytes(&self) -> &[u8] {
        let offset = self.idx as usize * self.format.frame_size();
        &self.payload[offset..]
    }

    /// Advances the read cursor by `frames`, clamped to the chunk's length.
    /// Returns the number of frames actually advanced.
    pub fn advance(&mut self, frames: u32) -> u32 {
        let advance = frames.min(self.remaining_frames());
        self.idx += advance;
        advance
    }

    /// Whether every frame in this chunk has been consumed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.idx >= self.frame_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> SampleFormat {
        SampleFormat::new(48_000, 16, 2)
    }

    fn make_chunk(frames: u32) -> PcmChunk {
        let format = format();
        let payload = vec![0u8; frames as usize * format.frame_size()];
        PcmChunk::new(format, Bytes::from(payload), WallClock::from_sec_usec(10, 0)).unwrap()
    }

    #[test]
    fn rejects_payload_not_multiple_of_frame_size() {
        let format = format();
        let payload = Bytes::from(vec![0u8; format.frame_size() + 1]);
        assert!(PcmChunk::new(format, payload, WallClock::from_micros(0)).is_err());
    }

    #[test]
    fn start_and_end_span_the_whole_chunk_before_any_read() {
        let chunk = make_chunk(480); // 10ms @ 48kHz
        assert_eq!(chunk.start(), WallClock::from_sec_usec(10, 0));
        assert_eq!(chunk.end(), WallClock::from_sec_usec(10, 10_000));
    }

    #[test]
    fn advance_moves_start_forward() {
        let mut chunk = make_chunk(480);
        let advanced = chunk.advance(240); // half the chunk, 5ms
        assert_eq!(advanced, 240);
        assert_eq!(chunk.start(), WallClock::from_sec_usec(10, 5_000));
        assert_eq!(chunk.end(), WallClock::from_sec_usec(10, 10_000));
    }

    #[test]
    fn advance_clamps_to_remaining_frames() {
        let mut chunk = make_chunk(10);
        let advanced = chunk.advance(100);
        assert_eq!(advanced, 10);
        assert!(chunk.is_exhausted());
    }

    #[test]
    fn remaining_bytes_reflects_cursor() {
        let mut chunk = make_chunk(4);
        let full_len = chunk.remaining_bytes().len();
        chunk.advance(1);
        assert_eq!(chunk.remaining_bytes().len(), full_len - format().frame_size());
    }
}
