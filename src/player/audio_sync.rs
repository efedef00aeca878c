// SPDX-License-Identifier: MPL-2.0
//! Audio sample-count correction toward the master clock.
//!
//! When audio is not the master, each decoded audio frame is stretched or
//! squeezed slightly so the audio clock converges on the master without
//! audible jumps. The difference between the two clocks is smoothed with an
//! exponential moving average; corrections start only after enough
//! measurements have accumulated and are clamped to a small percentage of
//! the frame.

use log::debug;

use crate::config::{AUDIO_DIFF_AVG_NB, AV_NOSYNC_THRESHOLD, SAMPLE_CORRECTION_PERCENT_MAX};

/// Smoothed audio/master clock difference tracker.
#[derive(Debug, Clone)]
pub struct AudioSyncCorrector {
    diff_cum: f64,
    avg_coef: f64,
    avg_count: u32,
    /// Smoothed differences below this (seconds) are left alone.
    threshold: f64,
}

impl Default for AudioSyncCorrector {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl AudioSyncCorrector {
    /// Creates a corrector ignoring average differences below `threshold` seconds.
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self {
            diff_cum: 0.0,
            // Weight of the oldest of the last AUDIO_DIFF_AVG_NB measurements is 1%.
            avg_coef: (0.01_f64.ln() / f64::from(AUDIO_DIFF_AVG_NB)).exp(),
            avg_count: 0,
            threshold,
        }
    }

    /// Derives the threshold from the negotiated device buffer.
    #[must_use]
    pub fn for_device(hw_buf_size: usize, bytes_per_sec: usize) -> Self {
        let threshold = if bytes_per_sec == 0 {
            0.0
        } else {
            hw_buf_size as f64 / bytes_per_sec as f64
        };
        Self::new(threshold)
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Forgets accumulated measurements.
    pub fn reset(&mut self) {
        self.diff_cum = 0.0;
        self.avg_count = 0;
    }

    /// Returns the number of samples to request for a frame of `nb_samples`.
    ///
    /// `diff` is `audio_clock - master_clock` in seconds, `None` when audio
    /// is the master or either clock is unknown.
    pub fn wanted_samples(&mut self, nb_samples: usize, sample_rate: u32, diff: Option<f64>) -> usize {
        let Some(diff) = diff else {
            return nb_samples;
        };

        if diff.is_nan() || diff.abs() >= AV_NOSYNC_THRESHOLD {
            // Unknown or too far apart: probably a discontinuity, start over.
            self.reset();
            return nb_samples;
        }

        self.diff_cum = diff + self.avg_coef * self.diff_cum;
        if self.avg_count < AUDIO_DIFF_AVG_NB {
            self.avg_count += 1;
            return nb_samples;
        }

        let avg_diff = self.diff_cum * (1.0 - self.avg_coef);
        if avg_diff.abs() < self.threshold {
            return nb_samples;
        }

        #[allow(clippy::cast_possible_truncation)]
        let wanted = nb_samples as i64 + (diff * f64::from(sample_rate)) as i64;
        let min = nb_samples * (100 - SAMPLE_CORRECTION_PERCENT_MAX) / 100;
        let max = nb_samples * (100 + SAMPLE_CORRECTION_PERCENT_MAX) / 100;
        let wanted = usize::try_from(wanted).unwrap_or(0).clamp(min, max);

        debug!(
            "audio sync: diff={diff:.6} adiff={avg_diff:.6} samples={wanted}/{nb_samples} threshold={:.6}",
            self.threshold
        );
        wanted
    }
}
