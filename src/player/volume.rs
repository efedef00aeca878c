// SPDX-License-Identifier: MPL-2.0
//! Volume domain type for audio playback.
//!
//! Volume lives on the integer mixer scale `0..=MIX_MAX_VOLUME` and is
//! stepped in decibels, so each key press changes loudness by roughly the
//! same perceived amount at any level.

use crate::config::{DEFAULT_VOLUME_PERCENT, MIX_MAX_VOLUME};

/// Mixer volume, guaranteed to be within `0..=MIX_MAX_VOLUME`.
///
/// # Example
///
/// ```
/// use lens_player::player::Volume;
///
/// let vol = Volume::from_percent(50);
/// assert_eq!(vol.level(), 64);
///
/// // Percentages above 100 are clamped
/// assert_eq!(Volume::from_percent(200).level(), 128);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Volume(u8);

impl Volume {
    /// Creates a volume from a raw mixer level, clamping to the valid range.
    #[must_use]
    pub fn new(level: u8) -> Self {
        Self(level.min(MIX_MAX_VOLUME))
    }

    /// Creates a volume from a startup percentage (0..=100).
    #[must_use]
    pub fn from_percent(percent: u8) -> Self {
        let level = u32::from(MIX_MAX_VOLUME) * u32::from(percent.min(100)) / 100;
        Self::new(u8::try_from(level).unwrap_or(MIX_MAX_VOLUME))
    }

    /// Raw mixer level.
    #[must_use]
    pub fn level(self) -> u8 {
        self.0
    }

    /// Linear gain applied to samples, `0.0..=1.0`.
    #[must_use]
    pub fn gain(self) -> f32 {
        f32::from(self.0) / f32::from(MIX_MAX_VOLUME)
    }

    /// Level in decibels relative to full scale.
    #[must_use]
    pub fn decibels(self) -> f64 {
        if self.0 == 0 {
            return -1000.0;
        }
        20.0 * (f64::from(self.0) / f64::from(MIX_MAX_VOLUME)).log10()
    }

    /// Moves the volume by `sign * step_db` decibels.
    ///
    /// When rounding would leave the level unchanged it moves by one unit
    /// instead, so repeated presses always make progress.
    #[must_use]
    pub fn step_db(self, sign: i8, step_db: f64) -> Self {
        let target = self.decibels() + f64::from(sign) * step_db;
        #[allow(clippy::cast_possible_truncation)]
        let stepped = (f64::from(MIX_MAX_VOLUME) * 10f64.powf(target / 20.0)).round() as i64;
        let level = if stepped == i64::from(self.0) {
            i64::from(self.0) + i64::from(sign)
        } else {
            stepped
        };
        let level = level.clamp(0, i64::from(MIX_MAX_VOLUME));
        Self::new(u8::try_from(level).unwrap_or(MIX_MAX_VOLUME))
    }

    #[must_use]
    pub fn is_min(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn is_max(self) -> bool {
        self.0 >= MIX_MAX_VOLUME
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::from_percent(DEFAULT_VOLUME_PERCENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VOLUME_STEP_DB;
    use crate::test_utils::assert_abs_diff_eq;

    #[test]
    fn new_clamps_to_mixer_range() {
        assert_eq!(Volume::new(255).level(), MIX_MAX_VOLUME);
        assert_eq!(Volume::new(10).level(), 10);
    }

    #[test]
    fn default_is_full_scale() {
        assert!(Volume::default().is_max());
        assert_abs_diff_eq!(Volume::default().gain(), 1.0);
    }

    #[test]
    fn percent_maps_onto_mixer_scale() {
        assert_eq!(Volume::from_percent(0).level(), 0);
        assert_eq!(Volume::from_percent(100).level(), 128);
        assert_eq!(Volume::from_percent(25).level(), 32);
    }

    #[test]
    fn db_steps_always_make_progress() {
        let mut vol = Volume::new(1);
        for _ in 0..200 {
            let louder = vol.step_db(1, VOLUME_STEP_DB);
            assert!(louder.level() > vol.level() || louder.is_max());
            vol = louder;
        }
        assert!(vol.is_max());

        for _ in 0..400 {
            let quieter = vol.step_db(-1, VOLUME_STEP_DB);
            assert!(quieter.level() < vol.level() || quieter.is_min());
            vol = quieter;
        }
        assert!(vol.is_min());
    }

    #[test]
    fn step_from_silence_moves_one_unit() {
        assert_eq!(Volume::new(0).step_db(1, VOLUME_STEP_DB).level(), 1);
        assert_eq!(Volume::new(0).step_db(-1, VOLUME_STEP_DB).level(), 0);
    }

    #[test]
    fn step_down_from_max_is_about_three_quarters_db() {
        let vol = Volume::default().step_db(-1, VOLUME_STEP_DB);
        assert_eq!(vol.level(), 117);
        assert_abs_diff_eq!(vol.decibels(), -0.78, epsilon = 0.01);
    }
}
