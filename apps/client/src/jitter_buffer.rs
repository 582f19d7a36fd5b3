//! The jitter buffer and playout scheduler — the centerpiece of the client,
//! grounded on `original_source/client/stream.h`'s `Stream` class.
//!
//! `get_player_chunk` is pulled by the sink, once per output period, with
//! that period's own estimate of `playout_delay` (the time between the call
//! returning and those samples reaching the DAC). Every output sample at
//! wall-clock `t` should be the source sample captured at server time
//! `t - buffer_ms + latency_offset`; this module is what makes that true
//! despite jittery arrival and clock drift between two independent machines.

use std::collections::VecDeque;

use snap_core::clock::{DoubleBuffer, TimeEstimator};
use snap_core::constants::{
    COARSE_RESYNC_THRESHOLD_US, JITTER_BUFFER_FUTURE_GRACE_MS, JITTER_WINDOW_LONG,
    JITTER_WINDOW_MEDIUM, JITTER_WINDOW_SHORT, PLAYOUT_WINDOW_MS,
};
use snap_core::sample_format::SampleFormat;
use snap_core::wire::time::WallClock;
use snap_core::PcmChunk;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Correction {
    /// The head chunk is late relative to target; drop one source frame to
    /// catch up.
    Skip,
    /// The head chunk is early; repeat one output frame to fall back.
    Duplicate,
}

/// Schedules a single-frame skip/duplicate every `N` output frames, where
/// `N` is derived from the medium-window rolling median so correction rate
/// tracks how far off steady-state playout actually is.
struct DriftCorrector {
    rate: u32,
    countdown: u32,
}

impl DriftCorrector {
    fn new(rate: u32) -> Self {
        Self { rate, countdown: 0 }
    }

    fn reset(&mut self) {
        self.countdown = 0;
    }

    /// Called once per output frame. Returns the correction due this frame,
    /// if any.
    fn tick(&mut self, medium_median_us: Option<i64>) -> Option<Correction> {
        let median = medium_median_us?;
        if median == 0 {
            return None;
        }
        if self.countdown == 0 {
            self.countdown = self.period_frames(median);
            Some(if median > 0 { Correction::Skip } else { Correction::Duplicate })
        } else {
            self.countdown -= 1;
            None
        }
    }

    fn period_frames(&self, median_us: i64) -> u32 {
        let n = i64::from(self.rate) * 1000 / median_us.abs().max(1);
        n.clamp(1, i64::from(self.rate)) as u32
    }
}

/// Buffers decoded PCM and schedules its release to line up with the
/// server's wall clock.
pub struct JitterBuffer {
    format: SampleFormat,
    queue: VecDeque<PcmChunk>,
    buffer_us: i64,
    latency_offset_us: i64,
    short: DoubleBuffer,
    medium: DoubleBuffer,
    long: DoubleBuffer,
    corrector: DriftCorrector,
    estimator: Arc<TimeEstimator>,
}

impl JitterBuffer {
    #[must_use]
    pub fn new(format: SampleFormat, buffer_ms: u32, latency_offset_ms: i64, estimator: Arc<TimeEstimator>) -> Self {
        Self {
            format,
            queue: VecDeque::new(),
            buffer_us: i64::from(buffer_ms) * 1_000,
            latency_offset_us: latency_offset_ms * 1_000,
            short: DoubleBuffer::new(JITTER_WINDOW_SHORT),
            medium: DoubleBuffer::new(JITTER_WINDOW_MEDIUM),
            long: DoubleBuffer::new(JITTER_WINDOW_LONG),
            corrector: DriftCorrector::new(format.rate()),
            estimator,
        }
    }

    /// Queues a freshly decoded chunk. A chunk whose start is further than
    /// `buffer_ms + grace` in the future is dropped instead of queued — a
    /// misbehaving or clock-skewed server would otherwise grow this buffer
    /// without bound.
    pub fn push(&mut self, chunk: PcmChunk) {
        let now_server = self.estimator.server_now(WallClock::now());
        let horizon = now_server + (self.buffer_us + JITTER_BUFFER_FUTURE_GRACE_MS * 1_000);
        if chunk.start() > horizon {
            log::debug!("jitter buffer: dropping chunk too far in the future");
            return;
        }
        self.queue.push_back(chunk);
    }

    /// Number of chunks currently queued (diagnostic / test use).
    #[must_use]
    pub fn queued_chunks(&self) -> usize {
        self.queue.len()
    }

    /// Fills `out_buf` (`frames` frames, native frame size) with the PCM
    /// that should be audible `playout_delay_us` after this call returns.
    pub fn get_player_chunk(&mut self, out_buf: &mut [u8], playout_delay_us: i64, frames: u32) {
        let frame_size = self.format.frame_size() as usize;
        assert_eq!(out_buf.len(), frames as usize * frame_size, "out_buf must hold exactly `frames` frames");

        self.maybe_coarse_resync();

        let target_server_time =
            self.estimator.server_now(WallClock::now()) + (playout_delay_us + self.latency_offset_us - self.buffer_us);

        // Drop whole chunks that have already fully elapsed relative to the
        // target, regardless of the in-window check below.
        while let Some(head) = self.queue.front() {
            if head.end() < target_server_time {
                self.queue.pop_front();
            } else {
                break;
            }
        }

        let Some(head) = self.queue.front_mut() else {
            out_buf.fill(0);
            return;
        };

        let age_us = head.start().diff_micros(target_server_time);
        self.record_age(age_us);

        if age_us > PLAYOUT_WINDOW_MS * 1_000 {
            // Head chunk is newer than the target: nothing to play yet.
            out_buf.fill(0);
            return;
        }
        if age_us < -(PLAYOUT_WINDOW_MS * 1_000) {
            let seek_frames = ((-age_us) * i64::from(self.format.rate()) / 1_000_000) as u32;
            head.advance(seek_frames);
        }

        self.read_frames(out_buf, frames, frame_size);
    }

    fn record_age(&mut self, age_us: i64) {
        self.short.push(age_us);
        self.medium.push(age_us);
        self.long.push(age_us);
    }

    fn maybe_coarse_resync(&mut self) {
        if let Some(long_median) = self.long.median() {
            if long_median.abs() > COARSE_RESYNC_THRESHOLD_US {
                log::info!("jitter buffer: coarse resync (long median {long_median}us)");
                self.queue.clear();
                self.short.clear();
                self.medium.clear();
                self.long.clear();
                self.corrector.reset();
            }
        }
    }

    fn read_frames(&mut self, out_buf: &mut [u8], frames: u32, frame_size: usize) {
        for i in 0..frames as usize {
            let offset = i * frame_size;

            if let Some(correction) = self.corrector.tick(self.medium.median()) {
                match correction {
                    Correction::Skip => self.skip_one_source_frame(),
                    Correction::Duplicate if i > 0 => {
                        out_buf.copy_within(offset - frame_size..offset, offset);
                        continue;
                    }
                    Correction::Duplicate => {} // nothing to duplicate on the very first frame
                }
            }

            match self.queue.front_mut() {
                Some(chunk) if chunk.remaining_frames() > 0 => {
                    out_buf[offset..offset + frame_size].copy_from_slice(&chunk.remaining_bytes()[..frame_size]);
                    chunk.advance(1);
                    if chunk.is_exhausted() {
                        self.queue.pop_front();
                    }
                }
                _ => out_buf[offset..offset + frame_size].fill(0),
            }
        }
    }

    fn skip_one_source_frame(&mut self) {
        if let Some(chunk) = self.queue.front_mut() {
            chunk.advance(1);
            if chunk.is_exhausted() {
                self.queue.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn format() -> SampleFormat {
        SampleFormat::new(48_000, 16, 2)
    }

    fn chunk_of(frames: u32, value: u8, start: WallClock) -> PcmChunk {
        let format = format();
        let payload = vec![value; frames as usize * format.frame_size() as usize];
        PcmChunk::new(format, Bytes::from(payload), start).unwrap()
    }

    fn buffer(buffer_ms: u32) -> JitterBuffer {
        JitterBuffer::new(format(), buffer_ms, 0, Arc::new(TimeEstimator::new()))
    }

    #[test]
    fn empty_buffer_yields_silence() {
        let mut jb = buffer(1_000);
        let mut out = vec![0xFFu8; 480 * format().frame_size() as usize];
        jb.get_player_chunk(&mut out, 0, 480);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn future_chunk_is_dropped_past_horizon() {
        let mut jb = buffer(1_000);
        let far_future = WallClock::now() + 10_000_000_000i64; // 10000s out
        jb.push(chunk_of(480, 7, far_future));
        assert_eq!(jb.queued_chunks(), 0);
    }

    #[test]
    fn in_window_chunk_is_played() {
        let mut jb = buffer(0);
        // buffer_ms = 0 means target ≈ server_now(); push a chunk starting now.
        let now = jb.estimator.server_now(WallClock::now());
        jb.push(chunk_of(480, 9, now));
        let mut out = vec![0u8; 480 * format().frame_size() as usize];
        jb.get_player_chunk(&mut out, 0, 480);
        // Some of the buffer should have been filled with the chunk's value
        // (exact amount depends on sub-millisecond timing between push and pull).
        assert!(out.iter().any(|&b| b == 9));
    }

    #[test]
    fn coarse_resync_clears_queue_when_long_median_exceeds_threshold() {
        let mut jb = buffer(1_000);
        for _ in 0..JITTER_WINDOW_LONG {
            jb.long.push(COARSE_RESYNC_THRESHOLD_US + 1);
        }
        jb.push(chunk_of(480, 1, WallClock::now()));
        let mut out = vec![0u8; 480 * format().frame_size() as usize];
        jb.get_player_chunk(&mut out, 0, 480);
        assert_eq!(jb.long.len(), 0);
    }

    #[test]
    fn drift_corrector_fires_skip_for_positive_median() {
        let mut corrector = DriftCorrector::new(48_000);
        let correction = (0..48_000).find_map(|_| corrector.tick(Some(2_000)));
        assert_eq!(correction, Some(Correction::Skip));
    }

    #[test]
    fn drift_corrector_fires_duplicate_for_negative_median() {
        let mut corrector = DriftCorrector::new(48_000);
        let correction = (0..48_000).find_map(|_| corrector.tick(Some(-2_000)));
        assert_eq!(correction, Some(Correction::Duplicate));
    }

    #[test]
    fn drift_corrector_fires_for_small_nonzero_median() {
        // Spec §4.7 step 5: correction fires for any nonzero medium median,
        // however small — there is no sub-1ms deadband.
        let mut corrector = DriftCorrector::new(48_000);
        let correction = (0..48_000).find_map(|_| corrector.tick(Some(10)));
        assert_eq!(correction, Some(Correction::Skip));
    }

    #[test]
    fn drift_corrector_stays_quiet_for_zero_median() {
        let mut corrector = DriftCorrector::new(48_000);
        for _ in 0..1_000 {
            assert_eq!(corrector.tick(Some(0)), None);
        }
    }
}
