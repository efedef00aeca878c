// SPDX-License-Identifier: MPL-2.0
//! Audio pull path: output negotiation and the device callback.
//!
//! The device thread calls [`AudioPipeline::fill`] whenever it needs more
//! samples. The pipeline pulls decoded blocks from the sample queue,
//! resamples them to the negotiated format (stretching them slightly when
//! audio is slaved to another clock) and updates the audio clock with the
//! amount of audio still buffered ahead of the speaker.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use super::audio_sync::AudioSyncCorrector;
use super::controls::PlaybackControls;
use super::frame_queue::FrameQueue;
use super::sync::Clocks;
use super::time_units::wall_time;
use crate::application::port::audio::BYTES_PER_SAMPLE;
use crate::application::port::{AudioDevice, AudioSpec, Resampler};
use crate::config::{SyncMode, AUDIO_MAX_CALLBACKS_PER_SEC, AUDIO_MIN_BUFFER_SIZE};
use crate::error::AudioError;

/// A decoded audio frame as queued by the audio decoder.
#[derive(Debug, Clone)]
pub struct AudioBlock<A> {
    pub samples: A,
    /// Samples per channel.
    pub nb_samples: usize,
    pub sample_rate: u32,
}

/// Channel count to try after a failure with `n` channels (index `min(n, 7)`).
const NEXT_CHANNELS: [u16; 8] = [0, 0, 1, 6, 2, 6, 4, 6];
const NEXT_SAMPLE_RATES: [u32; 5] = [0, 44_100, 48_000, 96_000, 192_000];

/// Device buffer size in sample frames for `sample_rate`.
///
/// Large enough to keep the callback rate at or below
/// [`AUDIO_MAX_CALLBACKS_PER_SEC`], never below [`AUDIO_MIN_BUFFER_SIZE`].
#[must_use]
pub fn buffer_frames_for(sample_rate: u32) -> u32 {
    let per_callback = (sample_rate / AUDIO_MAX_CALLBACKS_PER_SEC).max(1);
    AUDIO_MIN_BUFFER_SIZE.max(2 << per_callback.ilog2())
}

/// Opens the device with the source format, walking down the fallback ladder.
///
/// Channel counts are tried first; once they are exhausted the sample rate
/// steps down through the standard rates below the wanted one.
///
/// # Errors
///
/// Returns [`AudioError::NoDevice`] straight away when there is no device,
/// and [`AudioError::NoSupportedConfig`] once every combination was refused.
pub fn negotiate(
    device: &mut dyn AudioDevice,
    channels: u16,
    sample_rate: u32,
) -> Result<AudioSpec, AudioError> {
    if channels == 0 || sample_rate == 0 {
        return Err(AudioError::NoSupportedConfig {
            channels,
            sample_rate,
        });
    }

    let mut rate_index = NEXT_SAMPLE_RATES.len() - 1;
    while rate_index > 0 && NEXT_SAMPLE_RATES[rate_index] >= sample_rate {
        rate_index -= 1;
    }

    let mut wanted = AudioSpec {
        sample_rate,
        channels,
        buffer_frames: buffer_frames_for(sample_rate),
    };

    loop {
        match device.try_open(&wanted) {
            Ok(obtained) => {
                info!(
                    "audio output: {} Hz, {} channels, {} frames per buffer",
                    obtained.sample_rate, obtained.channels, obtained.buffer_frames
                );
                return Ok(obtained);
            }
            Err(AudioError::NoDevice) => return Err(AudioError::NoDevice),
            Err(e) => warn!(
                "audio open failed ({} channels, {} Hz): {e}",
                wanted.channels, wanted.sample_rate
            ),
        }

        wanted.channels = NEXT_CHANNELS[usize::from(wanted.channels.min(7))];
        if wanted.channels == 0 {
            let next_rate = NEXT_SAMPLE_RATES[rate_index];
            if next_rate == 0 {
                return Err(AudioError::NoSupportedConfig {
                    channels,
                    sample_rate: wanted.sample_rate,
                });
            }
            rate_index -= 1;
            wanted.sample_rate = next_rate;
            wanted.channels = channels;
        }
    }
}

/// State owned by the audio device callback.
pub struct AudioPipeline<A> {
    frames: Arc<FrameQueue<AudioBlock<A>>>,
    resampler: Box<dyn Resampler<A>>,
    target: AudioSpec,
    corrector: AudioSyncCorrector,
    clocks: Arc<Clocks>,
    controls: Arc<PlaybackControls>,
    buf: Vec<f32>,
    buf_index: usize,
    /// Media time at the end of the last decoded block.
    audio_clock: f64,
    audio_clock_serial: i64,
}

impl<A> AudioPipeline<A> {
    #[must_use]
    pub fn new(
        frames: Arc<FrameQueue<AudioBlock<A>>>,
        resampler: Box<dyn Resampler<A>>,
        target: AudioSpec,
        clocks: Arc<Clocks>,
        controls: Arc<PlaybackControls>,
    ) -> Self {
        let corrector = AudioSyncCorrector::for_device(target.hw_buf_size(), target.bytes_per_sec());
        debug!("audio diff threshold {:.4}s", corrector.threshold());
        Self {
            frames,
            resampler,
            target,
            corrector,
            clocks,
            controls,
            buf: Vec::new(),
            buf_index: 0,
            audio_clock: f64::NAN,
            audio_clock_serial: -1,
        }
    }

    #[must_use]
    pub fn target(&self) -> &AudioSpec {
        &self.target
    }

    /// Media time at the end of the last decoded block, NaN when unknown.
    #[must_use]
    pub fn audio_clock(&self) -> f64 {
        self.audio_clock
    }

    /// Decodes the next live block into the internal buffer.
    ///
    /// Returns false when paused, when no block arrived within half a device
    /// buffer, or when resampling failed.
    fn decode_frame(&mut self, callback_time: f64) -> bool {
        if self.controls.is_paused() {
            return false;
        }

        let bytes_per_sec = self.target.bytes_per_sec().max(1) as f64;
        let max_wait = self.target.hw_buf_size() as f64 / bytes_per_sec / 2.0;
        let info = loop {
            while self.frames.nb_remaining() == 0 {
                if wall_time() - callback_time > max_wait {
                    return false;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let Some(info) = self.frames.peek_readable() else {
                return false;
            };
            self.frames.advance();
            if info.serial == self.frames.serial() {
                break info;
            }
        };

        let diff = if self.clocks.master_sync_type() == SyncMode::Audio {
            None
        } else {
            Some(self.clocks.audio.get() - self.clocks.master_value())
        };

        let corrector = &mut self.corrector;
        let resampler = &mut self.resampler;
        let target = &self.target;
        let converted = self.frames.with_last(|frame| {
            let block = &frame.payload;
            let wanted = corrector.wanted_samples(block.nb_samples, block.sample_rate, diff);
            resampler
                .convert(&block.samples, wanted, target)
                .map(|samples| (samples, block.nb_samples, block.sample_rate))
        });

        let (samples, nb_samples, sample_rate) = match converted {
            Some(Ok(result)) => result,
            Some(Err(e)) => {
                warn!("audio conversion failed: {e}");
                return false;
            }
            None => return false,
        };

        self.buf = samples;
        self.buf_index = 0;
        self.audio_clock = if info.pts.is_nan() || sample_rate == 0 {
            f64::NAN
        } else {
            info.pts + nb_samples as f64 / f64::from(sample_rate)
        };
        self.audio_clock_serial = info.serial;
        true
    }

    fn fill_silence(&mut self) {
        let frame_size = self.target.frame_size().max(1);
        let bytes = AUDIO_MIN_BUFFER_SIZE as usize / frame_size * frame_size;
        self.buf.clear();
        self.buf.resize(bytes / BYTES_PER_SAMPLE, 0.0);
        self.buf_index = 0;
    }

    /// Fills `out` completely with interleaved samples in the negotiated format.
    pub fn fill(&mut self, out: &mut [f32]) {
        self.fill_at(wall_time(), out);
    }

    /// [`fill`](Self::fill) with an explicit callback time.
    pub fn fill_at(&mut self, callback_time: f64, out: &mut [f32]) {
        let muted = self.controls.is_muted();
        let gain = self.controls.volume().gain();

        let mut written = 0;
        while written < out.len() {
            if self.buf_index >= self.buf.len() && !self.decode_frame(callback_time) {
                self.fill_silence();
            }
            let chunk = (out.len() - written).min(self.buf.len() - self.buf_index);
            let source = &self.buf[self.buf_index..self.buf_index + chunk];
            let dest = &mut out[written..written + chunk];
            if muted || gain == 0.0 {
                dest.fill(0.0);
            } else {
                for (d, s) in dest.iter_mut().zip(source) {
                    *d = s * gain;
                }
            }
            written += chunk;
            self.buf_index += chunk;
        }

        if !self.audio_clock.is_nan() {
            let write_buf_bytes = (self.buf.len() - self.buf_index) * BYTES_PER_SAMPLE;
            let buffered = (2 * self.target.hw_buf_size() + write_buf_bytes) as f64
                / self.target.bytes_per_sec().max(1) as f64;
            self.clocks.audio.set_at(
                self.audio_clock - buffered,
                self.audio_clock_serial,
                callback_time,
            );
            self.clocks.external.sync_to_slave(&self.clocks.audio);
        }
    }
}
