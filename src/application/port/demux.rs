// SPDX-License-Identifier: MPL-2.0
//! Demuxing port definition.
//!
//! A [`MediaBackend`] opens a source into a [`Demuxer`] (owned by the reader
//! thread) and a [`CodecFactory`] (shared, used whenever a stream component
//! is opened). Both speak crate types only; backend payloads travel as the
//! associated `Packet`, `Picture` and `Samples` types.

use crate::application::port::audio::Resampler;
use crate::application::port::codec::{CodecDecoder, SubtitleDecoder};
use crate::application::port::render::ImageConverter;
use crate::config::{MAX_FRAME_DURATION, MAX_FRAME_DURATION_DISCONTINUOUS};
use crate::error::Result;
use crate::player::packet_queue::CompressedUnit;
use crate::player::serial::AbortHandle;
use crate::player::time_units::TimeBase;

/// Elementary stream media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    Other,
}

/// Static description of one elementary stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub media_type: MediaType,
    pub time_base: TimeBase,
    /// First timestamp, in `time_base`.
    pub start_time: Option<i64>,
    /// Guessed frame rate (video).
    pub frame_rate: Option<f64>,
    /// Sample rate in Hz (audio), 0 when unknown.
    pub sample_rate: u32,
    /// Channel count (audio), 0 when unknown.
    pub channels: u16,
    /// The stream is a single cover-art image rather than real video.
    pub attached_picture: bool,
    /// Program the stream belongs to, if the container has programs.
    pub program: Option<usize>,
    pub codec_name: String,
}

impl StreamInfo {
    /// Creates a stream description with neutral defaults.
    #[must_use]
    pub fn new(index: usize, media_type: MediaType, time_base: TimeBase) -> Self {
        Self {
            index,
            media_type,
            time_base,
            start_time: None,
            frame_rate: None,
            sample_rate: 0,
            channels: 0,
            attached_picture: false,
            program: None,
            codec_name: String::new(),
        }
    }
}

/// A chapter marker, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chapter {
    pub start: f64,
    pub end: f64,
}

/// Container-level description of an opened source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaInfo {
    pub url: String,
    /// Short container names, comma separated (e.g. `"mov,mp4,m4a"`).
    pub format_name: String,
    /// Start time in microseconds.
    pub start_time: Option<i64>,
    /// Duration in microseconds.
    pub duration: Option<i64>,
    /// Total bit rate in bit/s, 0 when unknown.
    pub bit_rate: i64,
    /// Source size in bytes.
    pub size_bytes: Option<i64>,
    /// Timestamps may jump (MPEG-TS style containers).
    pub ts_discontinuous: bool,
    /// The container refuses byte seeking.
    pub no_byte_seek: bool,
    pub chapters: Vec<Chapter>,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    /// Returns true for network sources that cannot be throttled by the reader.
    #[must_use]
    pub fn is_realtime(&self) -> bool {
        let format = self.format_name.as_str();
        if matches!(format, "rtp" | "rtsp" | "sdp") {
            return true;
        }
        self.url.starts_with("rtp:") || self.url.starts_with("udp:")
    }

    /// Largest plausible frame duration for this container, in seconds.
    #[must_use]
    pub fn max_frame_duration(&self) -> f64 {
        if self.ts_discontinuous {
            MAX_FRAME_DURATION_DISCONTINUOUS
        } else {
            MAX_FRAME_DURATION
        }
    }

    /// Whether byte seeking should be used when the user did not decide.
    #[must_use]
    pub fn prefers_byte_seek(&self) -> bool {
        self.ts_discontinuous && !self.no_byte_seek && self.format_name != "ogg"
    }

    /// Picks a stream of `media_type`, honoring an explicit `wanted` index.
    ///
    /// Without a usable wanted index the first stream of the type wins,
    /// preferring real video over attached pictures.
    #[must_use]
    pub fn best_stream(&self, media_type: MediaType, wanted: Option<usize>) -> Option<usize> {
        if let Some(index) = wanted {
            return self
                .streams
                .get(index)
                .filter(|s| s.media_type == media_type)
                .map(|s| s.index);
        }
        let mut candidates = self.streams.iter().filter(|s| s.media_type == media_type);
        let first = candidates.clone().next()?;
        candidates
            .find(|s| !s.attached_picture)
            .or(Some(first))
            .map(|s| s.index)
    }

    #[must_use]
    pub fn stream(&self, index: usize) -> Option<&StreamInfo> {
        self.streams.get(index)
    }
}

/// A pending seek, in microseconds (time mode) or bytes (byte mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub target: i64,
    pub min: i64,
    pub max: i64,
    pub by_bytes: bool,
}

/// Result of one [`Demuxer::read_unit`] call.
#[derive(Debug)]
pub enum ReadOutcome<P> {
    Unit(CompressedUnit<P>),
    /// Benign end of input.
    EndOfStream,
    /// Temporary failure; retry after a short wait.
    Retry,
    /// Hard I/O error; the reader must stop.
    Fatal(String),
}

/// Port for container demultiplexing.
///
/// The demuxer is owned by the reader thread for the whole session.
pub trait Demuxer: Send + 'static {
    type Packet: Send + 'static;

    fn info(&self) -> &MediaInfo;

    /// Reads the next compressed unit.
    fn read_unit(&mut self) -> ReadOutcome<Self::Packet>;

    /// Seeks so the next unit is at or near `request.target` within `[min, max]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot seek there.
    fn seek(&mut self, request: &SeekRequest) -> Result<()>;

    /// Pauses a network source.
    fn pause(&mut self) {}

    /// Resumes a network source.
    fn resume(&mut self) {}

    /// Returns the attached cover-art unit of `stream_index`, if any.
    fn attached_picture(&self, _stream_index: usize) -> Option<CompressedUnit<Self::Packet>> {
        None
    }

    /// Current byte position of the underlying I/O.
    fn byte_position(&self) -> Option<i64> {
        None
    }
}

/// Port for creating per-stream codecs and converters.
pub trait CodecFactory: Send + Sync + 'static {
    type Packet: Send + 'static;
    type Picture: Send + 'static;
    type Samples: Send + 'static;

    /// # Errors
    ///
    /// Returns an error if the codec is unsupported or fails to open.
    fn video_decoder(
        &self,
        stream: &StreamInfo,
    ) -> Result<Box<dyn CodecDecoder<Self::Packet, Self::Picture>>>;

    /// # Errors
    ///
    /// Returns an error if the codec is unsupported or fails to open.
    fn audio_decoder(
        &self,
        stream: &StreamInfo,
    ) -> Result<Box<dyn CodecDecoder<Self::Packet, Self::Samples>>>;

    /// # Errors
    ///
    /// Returns an error if the codec is unsupported or fails to open.
    fn subtitle_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn SubtitleDecoder<Self::Packet>>>;

    fn resampler(&self) -> Box<dyn Resampler<Self::Samples>>;

    fn image_converter(&self) -> Box<dyn ImageConverter<Self::Picture>>;
}

/// Port for opening sources.
pub trait MediaBackend: Send + Sync + 'static {
    type Packet: Send + 'static;
    type Picture: Send + 'static;
    type Samples: Send + 'static;
    type Demuxer: Demuxer<Packet = Self::Packet>;
    type Codecs: CodecFactory<Packet = Self::Packet, Picture = Self::Picture, Samples = Self::Samples>;

    /// Opens `source`. Blocking I/O polls `interrupt` and gives up once it is raised.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be opened or probed.
    fn open(&self, source: &str, interrupt: AbortHandle) -> Result<(Self::Demuxer, Self::Codecs)>;
}
