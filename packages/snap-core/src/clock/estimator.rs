//! Tracks the offset between the local clock and a remote (server) clock from
//! a stream of Time round-trip samples.
//!
//! The exposed `offset()` is a single atomic microsecond integer so the audio
//! callback path can read it without taking a lock (spec.md §5: "TimeEstimator
//! offset: single atomic integer µs").

use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

use crate::clock::double_buffer::DoubleBuffer;
use crate::constants::{
    TIME_ESTIMATOR_BUFFER_SIZE, TIME_ESTIMATOR_STALE_AFTER_SECS, TIME_ESTIMATOR_STEP_THRESHOLD_US,
};
use crate::wire::time::WallClock;

struct Inner {
    buffer: DoubleBuffer,
    last_sample_at: Option<WallClock>,
}

/// Estimates `server_clock - local_clock`, in microseconds, from half-diff
/// samples produced by the time-sync round trip (spec.md §4.6).
pub struct TimeEstimator {
    inner: Mutex<Inner>,
    offset_us: AtomicI64,
}

impl TimeEstimator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: DoubleBuffer::new(TIME_ESTIMATOR_BUFFER_SIZE),
                last_sample_at: None,
            }),
            offset_us: AtomicI64::new(0),
        }
    }

    /// Folds in one half-diff sample observed at local time `now`.
    ///
    /// Two conditions restart the estimator from this sample as a fresh
    /// baseline rather than blending it in: more than
    /// [`TIME_ESTIMATOR_STALE_AFTER_SECS`] have elapsed since the previous
    /// sample (link was idle), or the sample disagrees with the current
    /// estimate by more than [`TIME_ESTIMATOR_STEP_THRESHOLD_US`] (the clock
    /// stepped, e.g. an NTP correction).
    pub fn observe(&self, half_diff_us: i64, now: WallClock) {
        let mut inner = self.inner.lock();

        let stale = inner
            .last_sample_at
            .is_some_and(|prev| now.diff_micros(prev) > TIME_ESTIMATOR_STALE_AFTER_SECS as i64 * 1_000_000);
        let stepped = (half_diff_us - self.offset_us.load(Ordering::Relaxed)).abs()
            >= TIME_ESTIMATOR_STEP_THRESHOLD_US;

        if stale || stepped {
            inner.buffer.clear();
        }

        inner.buffer.push(half_diff_us);
        inner.last_sample_at = Some(now);

        if let Some(median) = inner.buffer.median() {
            self.offset_us.store(median, Ordering::Relaxed);
        } else {
            // Fewer than 3 samples: use the raw sample as a provisional
            // estimate so callers aren't stuck at a stale offset during warmup.
            self.offset_us.store(half_diff_us, Ordering::Relaxed);
        }
    }

    /// The current best estimate of `server_clock - local_clock`, in
    /// microseconds. Lock-free; safe to call from an audio callback.
    #[must_use]
    pub fn offset_us(&self) -> i64 {
        self.offset_us.load(Ordering::Relaxed)
    }

    /// `local_now + offset`, i.e. this process's best guess at the remote
    /// clock's current reading.
    #[must_use]
    pub fn server_now(&self, local_now: WallClock) -> WallClock {
        local_now + self.offset_us()
    }

    /// Number of samples currently folded into the median.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.inner.lock().buffer.len()
    }
}

impl Default for TimeEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_4_repeated_samples_converge_near_expected_offset() {
        // spec.md §8 scenario 4: repeat the -1250us sample 100x with gaussian
        // noise (approximated here with a small deterministic spread since we
        // have no RNG dependency in this crate), expect the 200-sample median
        // to land within 30us of -1250.
        let estimator = TimeEstimator::new();
        let base = WallClock::from_sec_usec(0, 0);
        let spread = [-120i64, -60, 0, 60, 120];
        for i in 0..200i64 {
            let noise = spread[(i as usize) % spread.len()];
            estimator.observe(-1_250 + noise, base + i * 1_000);
        }
        let offset = estimator.offset_us();
        assert!((offset - (-1_250)).abs() <= 30, "offset {offset} not within 30us of -1250");
    }

    #[test]
    fn stale_gap_resets_buffer_to_new_baseline() {
        let estimator = TimeEstimator::new();
        let t0 = WallClock::from_sec_usec(0, 0);
        estimator.observe(1_000, t0);
        estimator.observe(1_010, t0 + 1_000);
        estimator.observe(990, t0 + 2_000);
        assert_eq!(estimator.sample_count(), 3);

        // 61 seconds later: idle gap exceeds the stale threshold.
        let t_later = t0 + 61_000_000;
        estimator.observe(50_000, t_later);
        assert_eq!(estimator.sample_count(), 1);
        assert_eq!(estimator.offset_us(), 50_000);
    }

    #[test]
    fn large_step_clears_and_reseeds() {
        let estimator = TimeEstimator::new();
        let t0 = WallClock::from_sec_usec(0, 0);
        estimator.observe(100, t0);
        estimator.observe(110, t0 + 1_000);
        estimator.observe(90, t0 + 2_000);
        assert_eq!(estimator.sample_count(), 3);

        // A clock step larger than the threshold shows up as a sample that
        // disagrees wildly with the running estimate.
        estimator.observe(2_000_000, t0 + 3_000);
        assert_eq!(estimator.sample_count(), 1);
        assert_eq!(estimator.offset_us(), 2_000_000);
    }

    #[test]
    fn server_now_applies_offset() {
        let estimator = TimeEstimator::new();
        let t0 = WallClock::from_sec_usec(10, 0);
        estimator.observe(500, t0);
        assert_eq!(estimator.server_now(t0), t0 + 500);
    }
}
