// SPDX-License-Identifier: MPL-2.0
//! Audio output and resampling ports.
//!
//! The output format is always interleaved `f32`. An [`AudioDevice`] first
//! negotiates a concrete [`AudioSpec`] and is then started with a pull
//! callback that the device invokes from its own thread.

use crate::error::{AudioError, Result};

/// Size in bytes of one output sample.
pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<f32>();

/// Interleaved `f32` output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// Device buffer size in sample frames.
    pub buffer_frames: u32,
}

impl AudioSpec {
    /// Bytes per sample frame (all channels).
    #[must_use]
    pub fn frame_size(&self) -> usize {
        usize::from(self.channels) * BYTES_PER_SAMPLE
    }

    #[must_use]
    pub fn bytes_per_sec(&self) -> usize {
        self.sample_rate as usize * self.frame_size()
    }

    /// Size of the device buffer in bytes.
    #[must_use]
    pub fn hw_buf_size(&self) -> usize {
        self.buffer_frames as usize * self.frame_size()
    }
}

/// Pull callback: fill the interleaved slice completely.
pub type AudioCallback = Box<dyn FnMut(&mut [f32]) + Send>;

/// Port for the audio output device.
pub trait AudioDevice {
    /// Checks whether `wanted` can be opened, returning the format the device will use.
    ///
    /// # Errors
    ///
    /// Returns an [`AudioError`] if the device cannot play `wanted`.
    fn try_open(&mut self, wanted: &AudioSpec) -> std::result::Result<AudioSpec, AudioError>;

    /// Starts playback of the negotiated format, pulling from `callback`.
    ///
    /// # Errors
    ///
    /// Returns an [`AudioError`] if the stream cannot be built or started.
    fn start(&mut self, callback: AudioCallback) -> std::result::Result<(), AudioError>;

    /// Stops playback and releases the device.
    fn close(&mut self);
}

/// Port for converting decoded audio to the output format.
pub trait Resampler<A>: Send {
    /// Converts `block` to interleaved `f32` in `target`, stretching or
    /// squeezing it toward `wanted_nb_samples` input samples.
    ///
    /// # Errors
    ///
    /// Returns an error if the conversion context cannot be set up.
    fn convert(&mut self, block: &A, wanted_nb_samples: usize, target: &AudioSpec) -> Result<Vec<f32>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_sizes_are_derived_from_format() {
        let spec = AudioSpec {
            sample_rate: 48_000,
            channels: 2,
            buffer_frames: 1024,
        };
        assert_eq!(spec.frame_size(), 8);
        assert_eq!(spec.bytes_per_sec(), 384_000);
        assert_eq!(spec.hw_buf_size(), 8192);
    }
}
