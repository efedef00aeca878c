// SPDX-License-Identifier: MPL-2.0
//! `FFmpeg` adapters implementing the demux, codec and conversion ports.
//!
//! [`FfmpegBackend`] opens a source into an [`FfmpegDemuxer`] for the reader
//! thread and an [`FfmpegCodecs`] factory holding a copy of every stream's
//! codec parameters, so decoders can be created after the demuxer has moved.
//!
//! # Design Notes
//!
//! - Payloads cross threads wrapped in [`FfmpegPacket`], [`FfmpegPicture`]
//!   and [`FfmpegAudio`]
//! - Every `FFmpeg` context is owned by exactly one thread at a time
//! - Blocking reads poll the session abort flag through the interrupt callback

mod decoder;
mod demuxer;
mod resample;
mod scale;

use std::path::PathBuf;
use std::sync::Once;

use log::info;

pub use decoder::{FfmpegAudioDecoder, FfmpegSubtitleDecoder, FfmpegVideoDecoder};
pub use demuxer::FfmpegDemuxer;
pub use resample::FfmpegResampler;
pub use scale::FfmpegImageConverter;

use crate::application::port::{
    CodecDecoder, CodecFactory, ImageConverter, MediaBackend, Resampler, StreamInfo,
    SubtitleDecoder,
};
use crate::error::{Error, Result};
use crate::player::serial::AbortHandle;
use crate::player::time_units::TimeBase;

/// Static flag to ensure `FFmpeg` is initialized only once.
static FFMPEG_INIT: Once = Once::new();

/// Initializes `FFmpeg` and lowers its log level to errors.
///
/// Safe to call multiple times.
///
/// # Errors
///
/// Returns an error if the libraries fail to initialize.
pub fn init_ffmpeg() -> Result<()> {
    let mut init_result: Result<()> = Ok(());

    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg_next::init() {
            init_result = Err(Error::Open(format!("FFmpeg initialization failed: {e}")));
            return;
        }

        // SAFETY: av_log_set_level is thread-safe and only affects logging
        unsafe {
            ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_ERROR);
        }
    });

    init_result
}

/// A demuxed packet.
pub struct FfmpegPacket(pub(crate) ffmpeg_next::Packet);

/// A decoded picture in its native pixel format.
pub struct FfmpegPicture(pub(crate) ffmpeg_next::frame::Video);

/// A decoded audio frame in its native sample format.
pub struct FfmpegAudio(pub(crate) ffmpeg_next::frame::Audio);

// SAFETY: each wrapper owns its AVPacket/AVFrame exclusively. Payloads are
// handed from one thread to the next through the queues and never aliased.
unsafe impl Send for FfmpegPacket {}
// SAFETY: see FfmpegPacket.
unsafe impl Send for FfmpegPicture {}
// SAFETY: see FfmpegPacket.
unsafe impl Send for FfmpegAudio {}

/// Codec parameters of every stream, copied at open time.
struct StreamParameters(Vec<ffmpeg_next::codec::Parameters>);

// SAFETY: the parameters are owned copies (no reference to the input
// context). They are only read, to build decoder contexts.
unsafe impl Send for StreamParameters {}
// SAFETY: see Send above; no method mutates the parameters.
unsafe impl Sync for StreamParameters {}

/// Creates decoders and converters for streams of one opened source.
pub struct FfmpegCodecs {
    parameters: StreamParameters,
    time_bases: Vec<TimeBase>,
}

impl FfmpegCodecs {
    fn context_for(&self, stream: &StreamInfo) -> Result<ffmpeg_next::codec::context::Context> {
        let parameters = self
            .parameters
            .0
            .get(stream.index)
            .ok_or_else(|| Error::Unsupported(format!("no stream #{}", stream.index)))?;
        let mut context = ffmpeg_next::codec::context::Context::from_parameters(parameters.clone())
            .map_err(|e| Error::Decode(format!("failed to create codec context: {e}")))?;
        if let Some(tb) = self.time_bases.get(stream.index) {
            context.set_time_base(ffmpeg_next::Rational::new(tb.num, tb.den));
        }
        Ok(context)
    }
}

impl CodecFactory for FfmpegCodecs {
    type Packet = FfmpegPacket;
    type Picture = FfmpegPicture;
    type Samples = FfmpegAudio;

    fn video_decoder(
        &self,
        stream: &StreamInfo,
    ) -> Result<Box<dyn CodecDecoder<FfmpegPacket, FfmpegPicture>>> {
        let decoder = self
            .context_for(stream)?
            .decoder()
            .video()
            .map_err(|e| Error::Unsupported(format!("video codec {}: {e}", stream.codec_name)))?;
        Ok(Box::new(FfmpegVideoDecoder::new(decoder)))
    }

    fn audio_decoder(
        &self,
        stream: &StreamInfo,
    ) -> Result<Box<dyn CodecDecoder<FfmpegPacket, FfmpegAudio>>> {
        let decoder = self
            .context_for(stream)?
            .decoder()
            .audio()
            .map_err(|e| Error::Unsupported(format!("audio codec {}: {e}", stream.codec_name)))?;
        Ok(Box::new(FfmpegAudioDecoder::new(decoder)))
    }

    fn subtitle_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn SubtitleDecoder<FfmpegPacket>>> {
        let decoder = self
            .context_for(stream)?
            .decoder()
            .subtitle()
            .map_err(|e| {
                Error::Unsupported(format!("subtitle codec {}: {e}", stream.codec_name))
            })?;
        Ok(Box::new(FfmpegSubtitleDecoder::new(decoder)))
    }

    fn resampler(&self) -> Box<dyn Resampler<FfmpegAudio>> {
        Box::new(FfmpegResampler::new())
    }

    fn image_converter(&self) -> Box<dyn ImageConverter<FfmpegPicture>> {
        Box::new(FfmpegImageConverter::new())
    }
}

/// Opens files and URLs with libavformat.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl MediaBackend for FfmpegBackend {
    type Packet = FfmpegPacket;
    type Picture = FfmpegPicture;
    type Samples = FfmpegAudio;
    type Demuxer = FfmpegDemuxer;
    type Codecs = FfmpegCodecs;

    fn open(&self, source: &str, interrupt: AbortHandle) -> Result<(FfmpegDemuxer, FfmpegCodecs)> {
        init_ffmpeg()?;

        let path = PathBuf::from(source);
        let input = ffmpeg_next::format::input_with_interrupt(&path, move || interrupt.is_aborted())
            .map_err(|e| Error::Open(format!("{source}: {e}")))?;

        let parameters = input.streams().map(|s| s.parameters()).collect();
        let demuxer = FfmpegDemuxer::new(input, source);
        let time_bases = demuxer.stream_time_bases();
        info!(
            "opened {} ({}, {} streams)",
            source,
            demuxer.format_name(),
            time_bases.len()
        );

        let codecs = FfmpegCodecs {
            parameters: StreamParameters(parameters),
            time_bases,
        };
        Ok((demuxer, codecs))
    }
}

/// Converts an `FFmpeg` rational to a [`TimeBase`].
fn time_base_of(rational: ffmpeg_next::Rational) -> TimeBase {
    TimeBase::new(rational.numerator(), rational.denominator())
}

/// Maps `AV_NOPTS_VALUE` to `None`.
fn known_ts(ts: i64) -> Option<i64> {
    (ts != ffmpeg_next::ffi::AV_NOPTS_VALUE).then_some(ts)
}

/// Maps negative byte positions (unknown) to `None`.
fn known_pos(pos: i64) -> Option<i64> {
    (pos >= 0).then_some(pos)
}
