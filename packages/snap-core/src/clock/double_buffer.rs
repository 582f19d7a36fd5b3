//! A fixed-capacity rolling window with a median-of-3-around-the-middle
//! statistic.
//!
//! Both the time estimator's offset sample ring and the jitter buffer's
//! short/medium/long age accumulators are instances of this same shape: push
//! new samples, drop the oldest once full, and read back a stable central
//! tendency that shrugs off a handful of outliers without the cost of a full
//! sort-and-average. Sorting a copy and averaging the 3 values closest to the
//! middle index is cheap and, empirically, smooths single-sample spikes
//! better than a plain median while tracking drift faster than a full mean.

use std::collections::VecDeque;

/// A fixed-size ring of `i64` samples (microseconds in every current use) with
/// a median-of-3 readout.
#[derive(Debug, Clone)]
pub struct DoubleBuffer {
    capacity: usize,
    samples: VecDeque<i64>,
}

impl DoubleBuffer {
    /// Creates an empty buffer holding at most `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 3, "median-of-3 needs at least 3 samples of room");
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Pushes a new sample, evicting the oldest one once at capacity.
    pub fn push(&mut self, value: i64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Discards all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the buffer has reached its configured capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// The mean of the 3 values nearest the middle of the sorted samples, or
    /// `None` if fewer than 3 samples have been pushed.
    #[must_use]
    pub fn median(&self) -> Option<i64> {
        if self.samples.len() < 3 {
            return None;
        }
        let mut sorted: Vec<i64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        // For an odd length, mid-1..=mid+1 straddles the true median; for an
        // even length it straddles the two central values plus one neighbor.
        let lo = mid.saturating_sub(1);
        let hi = (lo + 3).min(sorted.len());
        let lo = hi - 3;
        let sum: i64 = sorted[lo..hi].iter().sum();
        Some(sum / 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_fewer_than_three_is_none() {
        let mut buf = DoubleBuffer::new(5);
        buf.push(10);
        buf.push(20);
        assert_eq!(buf.median(), None);
    }

    #[test]
    fn median_of_exactly_three() {
        let mut buf = DoubleBuffer::new(5);
        buf.push(10);
        buf.push(30);
        buf.push(20);
        assert_eq!(buf.median(), Some(20));
    }

    #[test]
    fn median_ignores_single_outlier() {
        let mut buf = DoubleBuffer::new(10);
        for v in [100, 102, 98, 101, 99, 10_000] {
            buf.push(v);
        }
        let median = buf.median().unwrap();
        assert!((95..=105).contains(&median), "median {median} skewed by outlier");
    }

    #[test]
    fn eviction_drops_oldest_once_full() {
        let mut buf = DoubleBuffer::new(3);
        buf.push(1);
        buf.push(2);
        buf.push(3);
        assert!(buf.is_full());
        buf.push(4);
        assert_eq!(buf.len(), 3);
        let sorted: Vec<i64> = buf.samples.iter().copied().collect();
        assert_eq!(sorted, vec![2, 3, 4]);
    }

    #[test]
    fn clear_empties_buffer() {
        let mut buf = DoubleBuffer::new(5);
        buf.push(1);
        buf.push(2);
        buf.push(3);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.median(), None);
    }
}
