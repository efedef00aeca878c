// SPDX-License-Identifier: MPL-2.0
//! Audio output using cpal.
//!
//! [`CpalOutput`] implements [`AudioDevice`] on the host's default output
//! device. The device pulls interleaved `f32` from the playback callback and
//! converts to whatever sample format the hardware stream uses.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedBufferSize, SupportedStreamConfigRange};
use log::{debug, error, warn};

use crate::application::port::{AudioCallback, AudioDevice, AudioSpec};
use crate::error::AudioError;

/// Sample formats we can feed, in order of preference.
const FORMAT_PREFERENCE: [SampleFormat; 3] = [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16];

/// A stream configuration chosen for a wanted [`AudioSpec`].
#[derive(Debug, Clone)]
struct Selected {
    config: cpal::StreamConfig,
    format: SampleFormat,
    spec: AudioSpec,
}

/// Picks the best supported range for `wanted`.
///
/// The channel count must match exactly and the rate must lie inside the
/// range. The buffer is fixed to the wanted size, clamped to what the
/// device reports.
fn select_config(ranges: &[SupportedStreamConfigRange], wanted: &AudioSpec) -> Option<Selected> {
    let range = FORMAT_PREFERENCE.iter().find_map(|format| {
        ranges.iter().find(|r| {
            r.sample_format() == *format
                && r.channels() == wanted.channels
                && r.min_sample_rate() <= wanted.sample_rate
                && wanted.sample_rate <= r.max_sample_rate()
        })
    })?;

    let (buffer_size, buffer_frames) = match range.buffer_size() {
        SupportedBufferSize::Range { min, max } => {
            let frames = wanted.buffer_frames.clamp(*min, *max);
            (cpal::BufferSize::Fixed(frames), frames)
        }
        SupportedBufferSize::Unknown => (cpal::BufferSize::Default, wanted.buffer_frames),
    };

    Some(Selected {
        config: cpal::StreamConfig {
            channels: wanted.channels,
            sample_rate: wanted.sample_rate,
            buffer_size,
        },
        format: range.sample_format(),
        spec: AudioSpec {
            sample_rate: wanted.sample_rate,
            channels: wanted.channels,
            buffer_frames,
        },
    })
}

/// Converts `src` into the device format.
///
/// Clamping to slightly below 1.0 keeps `i16` conversion from overflowing.
fn write_samples<T: cpal::SizedSample + cpal::FromSample<f32>>(src: &[f32], dst: &mut [T]) {
    for (out, sample) in dst.iter_mut().zip(src) {
        *out = T::from_sample(sample.clamp(-1.0, 0.999_999_9));
    }
}

/// Default output device of the default host.
pub struct CpalOutput {
    device: Option<cpal::Device>,
    selected: Option<Selected>,
    stream: Option<cpal::Stream>,
}

impl CpalOutput {
    /// Looks up the default output device; a missing device surfaces on the first open.
    #[must_use]
    pub fn new() -> Self {
        let host = cpal::default_host();
        let device = host.default_output_device();
        if device.is_none() {
            warn!("no audio output device found");
        }
        Self {
            device,
            selected: None,
            stream: None,
        }
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut callback: AudioCallback,
    ) -> Result<cpal::Stream, AudioError> {
        let mut scratch: Vec<f32> = Vec::new();
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    callback(&mut scratch);
                    write_samples(&scratch, data);
                },
                |err| {
                    error!("audio output error: {err}");
                },
                None,
            )
            .map_err(|e| AudioError::Stream(format!("failed to build audio stream: {e}")))
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for CpalOutput {
    fn try_open(&mut self, wanted: &AudioSpec) -> Result<AudioSpec, AudioError> {
        let device = self.device.as_ref().ok_or(AudioError::NoDevice)?;
        let ranges: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| AudioError::Stream(format!("failed to query output configs: {e}")))?
            .collect();

        let selected = select_config(&ranges, wanted).ok_or(AudioError::NoSupportedConfig {
            channels: wanted.channels,
            sample_rate: wanted.sample_rate,
        })?;
        debug!("selected {:?} output for {:?}", selected.format, selected.spec);
        let spec = selected.spec;
        self.selected = Some(selected);
        Ok(spec)
    }

    fn start(&mut self, callback: AudioCallback) -> Result<(), AudioError> {
        let device = self.device.as_ref().ok_or(AudioError::NoDevice)?;
        let selected = self
            .selected
            .as_ref()
            .ok_or_else(|| AudioError::Stream("output was not opened".to_string()))?;

        let stream = match selected.format {
            SampleFormat::F32 => Self::build_stream::<f32>(device, &selected.config, callback)?,
            SampleFormat::I16 => Self::build_stream::<i16>(device, &selected.config, callback)?,
            SampleFormat::U16 => Self::build_stream::<u16>(device, &selected.config, callback)?,
            other => {
                return Err(AudioError::Stream(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        };
        stream
            .play()
            .map_err(|e| AudioError::Stream(format!("failed to start audio stream: {e}")))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!("audio stream pause on close failed: {e}");
            }
        }
        self.selected = None;
    }
}
