// SPDX-License-Identifier: MPL-2.0
//! Time unit conversion utilities for playback.
//!
//! Provides:
//! - [`TimeBase`], the rational unit of container and codec timestamps
//! - conversions between seconds and microseconds (seek targets, start times)
//! - [`wall_time`], the monotonic clock every [`Clock`](super::clock::Clock) runs on

use std::sync::OnceLock;
use std::time::Instant;

/// Microseconds per second as f64 for calculations.
pub const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Reference instant for wall time. All wall times are seconds since this instant.
static REFERENCE_INSTANT: OnceLock<Instant> = OnceLock::new();

/// Monotonic wall time in seconds.
#[must_use]
pub fn wall_time() -> f64 {
    let reference = REFERENCE_INSTANT.get_or_init(Instant::now);
    reference.elapsed().as_secs_f64()
}

/// Rational time unit (`num / den` seconds per tick).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    /// Microsecond time base used for container-level times.
    pub const MICROS: TimeBase = TimeBase::new(1, 1_000_000);

    #[must_use]
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Returns the duration of one tick in seconds, or NaN for a degenerate base.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            return f64::NAN;
        }
        f64::from(self.num) / f64::from(self.den)
    }

    /// Converts a timestamp in this unit to seconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // timestamps stay far below 2^52 ticks
    pub fn to_secs(self, ts: i64) -> f64 {
        ts as f64 * self.as_f64()
    }

    /// Rescales `ts` from `self` to `to`, rounding to nearest (ties away from zero).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // result fits i64 for in-range timestamps
    pub fn rescale(self, ts: i64, to: TimeBase) -> i64 {
        let num = i128::from(ts) * i128::from(self.num) * i128::from(to.den);
        let den = i128::from(self.den) * i128::from(to.num);
        if den == 0 {
            return ts;
        }
        let half = den.abs() / 2;
        let magnitude = (num.abs() + half) / den.abs();
        if (num < 0) != (den < 0) {
            -(magnitude as i64)
        } else {
            magnitude as i64
        }
    }
}

/// Converts seconds to microseconds (f64).
#[inline]
#[must_use]
pub fn secs_to_micros(secs: f64) -> f64 {
    secs * MICROS_PER_SECOND
}

/// Converts microseconds to seconds (f64).
#[inline]
#[must_use]
pub fn micros_to_secs(micros: f64) -> f64 {
    micros / MICROS_PER_SECOND
}

/// Converts seconds to an integer microsecond timestamp.
///
/// # Examples
///
/// ```
/// use lens_player::player::time_units::secs_to_ts;
///
/// assert_eq!(secs_to_ts(1.0), 1_000_000);
/// assert_eq!(secs_to_ts(0.5), 500_000);
/// ```
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn secs_to_ts(secs: f64) -> i64 {
    (secs * MICROS_PER_SECOND) as i64
}

/// Converts an integer microsecond timestamp to seconds.
#[inline]
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn ts_to_secs(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_SECOND
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_abs_diff_eq;

    #[test]
    fn rescale_rounds_to_nearest() {
        let ninety_khz = TimeBase::new(1, 90_000);
        let audio = TimeBase::new(1, 48_000);
        assert_eq!(ninety_khz.rescale(90_000, audio), 48_000);
        assert_eq!(ninety_khz.rescale(3, audio), 2); // 1.6 -> 2
        assert_eq!(ninety_khz.rescale(-3, audio), -2);
    }

    #[test]
    fn rescale_to_micros_matches_seconds() {
        let tb = TimeBase::new(1, 25);
        assert_eq!(tb.rescale(50, TimeBase::MICROS), 2_000_000);
        assert_abs_diff_eq!(tb.to_secs(50), 2.0);
    }

    #[test]
    fn degenerate_time_base_is_nan() {
        assert!(TimeBase::new(1, 0).as_f64().is_nan());
    }

    #[test]
    fn micros_round_trip_within_a_microsecond() {
        let secs = 1.234567;
        assert!((ts_to_secs(secs_to_ts(secs)) - secs).abs() < 0.000_001);
        assert_abs_diff_eq!(micros_to_secs(secs_to_micros(2.5)), 2.5);
    }

    #[test]
    fn wall_time_is_monotonic() {
        let a = wall_time();
        let b = wall_time();
        assert!(b >= a);
    }
}
