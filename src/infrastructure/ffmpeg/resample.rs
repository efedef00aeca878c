// SPDX-License-Identifier: MPL-2.0
//! libswresample conversion to the interleaved `f32` output format.

use std::os::raw::c_int;

use log::debug;

use super::FfmpegAudio;
use crate::application::port::{AudioSpec, Resampler};
use crate::error::{Error, Result};

/// Extra output room for samples buffered inside the resampler.
const OUTPUT_PADDING: usize = 256;

/// Source format a resampling context was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SourceKey {
    format: ffmpeg_next::format::Sample,
    channels: u16,
    rate: u32,
    target_rate: u32,
    target_channels: u16,
}

/// Converts decoded audio, rebuilding the context whenever the source changes.
pub struct FfmpegResampler {
    context: Option<(SourceKey, ffmpeg_next::software::resampling::Context)>,
}

// SAFETY: the resampling context is created and used by the audio callback
// thread only, after the resampler has been moved there.
unsafe impl Send for FfmpegResampler {}

impl FfmpegResampler {
    pub(super) fn new() -> Self {
        Self { context: None }
    }

    fn context_for(
        &mut self,
        frame: &ffmpeg_next::frame::Audio,
        target: &AudioSpec,
    ) -> Result<&mut ffmpeg_next::software::resampling::Context> {
        let key = SourceKey {
            format: frame.format(),
            channels: u16::try_from(frame.channels()).unwrap_or(0),
            rate: frame.rate(),
            target_rate: target.sample_rate,
            target_channels: target.channels,
        };
        let stale = self.context.as_ref().is_none_or(|(current, _)| *current != key);
        if stale {
            debug!(
                "resampler {} Hz {:?} {}ch -> {} Hz {}ch",
                key.rate, key.format, key.channels, key.target_rate, key.target_channels
            );
            let context = ffmpeg_next::software::resampling::Context::get(
                frame.format(),
                frame.channel_layout(),
                frame.rate(),
                ffmpeg_next::format::Sample::F32(ffmpeg_next::format::sample::Type::Packed),
                output_layout(target.channels),
                target.sample_rate,
            )
            .map_err(|e| Error::Decode(format!("failed to create resampler: {e}")))?;
            self.context = Some((key, context));
        }
        self.context
            .as_mut()
            .map(|(_, context)| context)
            .ok_or_else(|| Error::Decode("resampler unavailable".to_string()))
    }
}

impl Resampler<FfmpegAudio> for FfmpegResampler {
    fn convert(&mut self, block: &FfmpegAudio, wanted_nb_samples: usize, target: &AudioSpec) -> Result<Vec<f32>> {
        let frame = &block.0;
        let in_samples = frame.samples();
        let in_rate = frame.rate().max(1);
        let context = self.context_for(frame, target)?;

        if wanted_nb_samples != in_samples {
            let delta = (wanted_nb_samples as i64 - in_samples as i64) * i64::from(target.sample_rate)
                / i64::from(in_rate);
            let distance = wanted_nb_samples as i64 * i64::from(target.sample_rate) / i64::from(in_rate);
            let (Ok(delta), Ok(distance)) = (c_int::try_from(delta), c_int::try_from(distance)) else {
                return Err(Error::Decode("compensation out of range".to_string()));
            };
            // SAFETY: the context is exclusively borrowed for the call.
            let ret = unsafe {
                ffmpeg_next::ffi::swr_set_compensation(context.as_mut_ptr(), delta, distance)
            };
            if ret < 0 {
                return Err(Error::Decode(format!(
                    "swr_set_compensation failed: {}",
                    ffmpeg_next::Error::from(ret)
                )));
            }
        }

        let capacity = wanted_nb_samples * target.sample_rate as usize / in_rate as usize + OUTPUT_PADDING;
        let layout = output_layout(target.channels);
        let mut output = ffmpeg_next::frame::Audio::new(
            ffmpeg_next::format::Sample::F32(ffmpeg_next::format::sample::Type::Packed),
            capacity,
            layout,
        );
        context
            .run(frame, &mut output)
            .map_err(|e| Error::Decode(format!("resampling failed: {e}")))?;

        let produced_channels = layout_channels(target.channels);
        let produced = extract_samples(&output, produced_channels);
        Ok(remap_channels(&produced, produced_channels, target.channels))
    }
}

/// Output layout: mono stays mono, everything else is rendered as stereo.
fn output_layout(channels: u16) -> ffmpeg_next::ChannelLayout {
    match channels {
        1 => ffmpeg_next::ChannelLayout::MONO,
        _ => ffmpeg_next::ChannelLayout::STEREO,
    }
}

fn layout_channels(channels: u16) -> u16 {
    if channels == 1 {
        1
    } else {
        2
    }
}

/// Extracts interleaved f32 samples from a packed output frame.
fn extract_samples(frame: &ffmpeg_next::frame::Audio, channels: u16) -> Vec<f32> {
    let data = frame.data(0);
    let sample_count = frame.samples() * usize::from(channels);
    data.chunks_exact(4)
        .take(sample_count)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Spreads `from`-channel interleaved samples over `to` channels.
///
/// Extra output channels are silent; missing ones are dropped.
fn remap_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == to || from == 0 {
        return samples.to_vec();
    }
    let (from, to) = (usize::from(from), usize::from(to));
    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        for channel in 0..to {
            out.push(frame.get(channel).copied().unwrap_or(0.0));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_spreads_over_surround_layouts() {
        let out = remap_channels(&[0.1, 0.2, 0.3, 0.4], 2, 6);
        assert_eq!(
            out,
            vec![0.1, 0.2, 0.0, 0.0, 0.0, 0.0, 0.3, 0.4, 0.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn matching_channel_counts_pass_through() {
        let samples = [0.5, -0.5];
        assert_eq!(remap_channels(&samples, 2, 2), samples.to_vec());
        assert_eq!(remap_channels(&samples, 1, 1), samples.to_vec());
    }

    #[test]
    fn layouts_fold_to_mono_or_stereo() {
        assert_eq!(layout_channels(1), 1);
        assert_eq!(layout_channels(2), 2);
        assert_eq!(layout_channels(6), 2);
    }
}
