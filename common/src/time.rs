//! Wall-Clock Timestamps with Microsecond Resolution
//!
//! The radio paces everything against wall time at microsecond granularity:
//! TTI deadlines, message origination times and the receive-ready test are
//! all comparisons between [`RadioTime`] values. Differences can be negative
//! (a deadline already passed), so deltas are signed microseconds.

use std::fmt;
use std::ops::Add;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Microseconds per second.
pub const MICROS_PER_SEC: u32 = 1_000_000;

/// A point in wall-clock time, seconds since the Unix epoch plus microseconds.
///
/// Ordering is lexicographic on (secs, micros), which matches chronological
/// order because `micros` is kept normalized below one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RadioTime {
    secs: u64,
    micros: u32,
}

impl RadioTime {
    /// Build a timestamp, normalizing microsecond overflow into seconds.
    pub fn new(secs: u64, micros: u32) -> Self {
        Self {
            secs: secs + (micros / MICROS_PER_SEC) as u64,
            micros: micros % MICROS_PER_SEC,
        }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        // The system clock predating the epoch is not a condition the radio
        // can run under anyway.
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self {
            secs: since_epoch.as_secs(),
            micros: since_epoch.subsec_micros(),
        }
    }

    /// Build from the split representation used by the PHY API
    /// (whole seconds plus fractional seconds).
    pub fn from_parts(full_secs: u64, frac_secs: f64) -> Self {
        let micros = (frac_secs * f64::from(MICROS_PER_SEC)).round() as u32;
        Self::new(full_secs, micros)
    }

    /// Whole seconds since the epoch.
    pub fn full_secs(&self) -> u64 {
        self.secs
    }

    /// Fractional seconds in `[0, 1)`.
    pub fn frac_secs(&self) -> f64 {
        f64::from(self.micros) / f64::from(MICROS_PER_SEC)
    }

    /// Microseconds within the current second.
    pub fn subsec_micros(&self) -> u32 {
        self.micros
    }

    /// Total microseconds since the epoch.
    pub fn as_micros(&self) -> u64 {
        self.secs * u64::from(MICROS_PER_SEC) + u64::from(self.micros)
    }

    /// Signed difference `self - earlier` in microseconds.
    ///
    /// Negative when `self` precedes `earlier`; this is the deadline test
    /// used throughout the send and receive paths.
    pub fn delta_micros(&self, earlier: RadioTime) -> i64 {
        self.as_micros() as i64 - earlier.as_micros() as i64
    }

    /// The timestamp rounded up to the next whole second, unchanged if
    /// already second-aligned.
    pub fn ceil_to_second(&self) -> Self {
        if self.micros == 0 {
            *self
        } else {
            Self {
                secs: self.secs + 1,
                micros: 0,
            }
        }
    }

    /// Duration until `later`, zero if `later` has already passed.
    pub fn saturating_duration_until(&self, later: RadioTime) -> Duration {
        let delta = later.delta_micros(*self);
        if delta <= 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(delta as u64)
        }
    }
}

impl Add<Duration> for RadioTime {
    type Output = RadioTime;

    fn add(self, rhs: Duration) -> RadioTime {
        RadioTime::new(
            self.secs + rhs.as_secs(),
            self.micros + rhs.subsec_micros(),
        )
    }
}

impl fmt::Display for RadioTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Seconds modulo a minute keep log lines short while still lining
        // up with the subframe cadence.
        write!(f, "{}:{:06}", self.secs % 60, self.micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let t = RadioTime::new(10, 2_500_000);
        assert_eq!(t.full_secs(), 12);
        assert_eq!(t.subsec_micros(), 500_000);
    }

    #[test]
    fn test_ordering_is_chronological() {
        let a = RadioTime::new(5, 999_999);
        let b = RadioTime::new(6, 0);
        let c = RadioTime::new(6, 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_signed_delta() {
        let a = RadioTime::new(10, 250_000);
        let b = RadioTime::new(10, 750_000);
        assert_eq!(b.delta_micros(a), 500_000);
        assert_eq!(a.delta_micros(b), -500_000);
    }

    #[test]
    fn test_add_duration() {
        let t = RadioTime::new(1, 999_000) + Duration::from_millis(2);
        assert_eq!(t.full_secs(), 2);
        assert_eq!(t.subsec_micros(), 1_000);
    }

    #[test]
    fn test_ceil_to_second() {
        assert_eq!(
            RadioTime::new(7, 1).ceil_to_second(),
            RadioTime::new(8, 0)
        );
        assert_eq!(
            RadioTime::new(7, 0).ceil_to_second(),
            RadioTime::new(7, 0)
        );
    }

    #[test]
    fn test_from_parts_round_trip() {
        let t = RadioTime::from_parts(42, 0.123456);
        assert_eq!(t.full_secs(), 42);
        assert!((t.frac_secs() - 0.123456).abs() < 1e-6);
    }
}
