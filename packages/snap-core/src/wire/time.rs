//! Wall-clock timestamp representation.
//!
//! The wire format is the split `(sec: i32, usec: i32)` pair inherited from
//! the original protocol for compatibility, but per the design notes all
//! internal arithmetic uses a single signed 64-bit microsecond count to avoid
//! split-field carry bugs.

use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A point in the server's (or client's) wall clock, as microseconds since
/// the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WallClock(i64);

impl WallClock {
    /// Constructs a `WallClock` from raw microseconds since the epoch.
    #[must_use]
    pub const fn from_micros(us: i64) -> Self {
        Self(us)
    }

    /// The current system wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self(d.as_micros() as i64)
    }

    /// Reconstructs from the wire's split `(sec, usec)` representation.
    #[must_use]
    pub const fn from_sec_usec(sec: i32, usec: i32) -> Self {
        Self(sec as i64 * 1_000_000 + usec as i64)
    }

    /// Splits into the wire's `(sec, usec)` representation. `usec` is always
    /// normalized into `[0, 1_000_000)`.
    #[must_use]
    pub const fn to_sec_usec(self) -> (i32, i32) {
        let sec = self.0.div_euclid(1_000_000);
        let usec = self.0.rem_euclid(1_000_000);
        (sec as i32, usec as i32)
    }

    /// Raw microseconds since the Unix epoch.
    #[must_use]
    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Signed microsecond difference `self - other`.
    #[must_use]
    pub const fn diff_micros(self, other: Self) -> i64 {
        self.0 - other.0
    }
}

impl Add<Duration> for WallClock {
    type Output = Self;
    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs.as_micros() as i64)
    }
}

impl Add<i64> for WallClock {
    type Output = Self;
    /// Adds a signed microsecond offset.
    fn add(self, rhs: i64) -> Self {
        Self(self.0 + rhs)
    }
}

impl Sub<i64> for WallClock {
    type Output = Self;
    fn sub(self, rhs: i64) -> Self {
        Self(self.0 - rhs)
    }
}

impl Sub for WallClock {
    type Output = i64;
    /// Difference in microseconds. Prefer [`Self::diff_micros`] when the
    /// intent to subtract two clock points (rather than get a duration) needs
    /// to be explicit at the call site.
    fn sub(self, rhs: Self) -> i64 {
        self.0 - rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sec_usec_roundtrip() {
        let ts = WallClock::from_sec_usec(10, 2500);
        assert_eq!(ts.to_sec_usec(), (10, 2500));
    }

    #[test]
    fn negative_sec_usec_roundtrip() {
        let ts = WallClock::from_sec_usec(-1, 500_000);
        assert_eq!(ts.to_sec_usec(), (-1, 500_000));
    }

    #[test]
    fn diff_micros() {
        let a = WallClock::from_sec_usec(10, 5000);
        let b = WallClock::from_sec_usec(10, 2500);
        assert_eq!(a.diff_micros(b), 2500);
        assert_eq!(b.diff_micros(a), -2500);
    }

    #[test]
    fn add_duration() {
        let ts = WallClock::from_sec_usec(10, 999_000);
        let shifted = ts + Duration::from_millis(2);
        assert_eq!(shifted.to_sec_usec(), (11, 1_000));
    }

    #[test]
    fn scenario_4_offset_computation() {
        // spec.md §8 scenario 4.
        let sent = WallClock::from_sec_usec(10, 0);
        let server_recv = WallClock::from_sec_usec(10, 2_500);
        let client_recv = WallClock::from_sec_usec(10, 5_000);

        let local_rtt_us = client_recv.diff_micros(sent);
        let server_rtt_us: i64 = server_recv.diff_micros(sent); // latency payload from the server
        let half_diff_us = (server_rtt_us - local_rtt_us) / 2;

        assert_eq!(local_rtt_us, 5_000);
        assert_eq!(server_rtt_us, 2_500);
        assert_eq!(half_diff_us, -1_250);
    }
}
