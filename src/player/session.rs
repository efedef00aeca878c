// SPDX-License-Identifier: MPL-2.0
//! One playback session: an opened source and its running pipeline.
//!
//! [`Session`] owns the decoder stages, the reader thread and the video
//! scheduler. It lives on the presentation thread; every user operation
//! (pause, seek, stream switch, volume) goes through its methods, and
//! [`Session::close`] tears the pipeline down in dependency order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use super::audio::{negotiate, AudioBlock, AudioPipeline};
use super::controls::PlaybackControls;
use super::decoder::{self, DecoderHarness, DecoderStage, StreamKind};
use super::event::EventSender;
use super::frame_queue::FrameInfo;
use super::reader::{
    FrameBacklog, PendingSeek, ReaderControl, ReaderLoop, ReaderSettings, StreamFeed, StreamRoutes,
};
use super::sync::{Clocks, QueueLevels, SyncScheduler};
use super::time_units::MICROS_PER_SECOND;
use super::volume::Volume;
use crate::application::port::{
    AudioDevice, Chapter, CodecFactory, Demuxer, MediaBackend, MediaInfo, MediaType, Renderer,
    SeekRequest, SubtitleOverlay,
};
use crate::config::{
    FrameDropMode, SessionConfig, SyncMode, AV_NOSYNC_THRESHOLD, FALLBACK_BYTES_PER_SEC,
};
use crate::error::{Error, Result};

/// Snapshot for the periodic status line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStats {
    pub master_clock: f64,
    /// Which difference `av_diff` measures.
    pub diff_label: &'static str,
    pub av_diff: f64,
    pub frame_drops_early: u64,
    pub frame_drops_late: u64,
    /// Buffered bytes per packet queue.
    pub audio_queue_bytes: usize,
    pub video_queue_bytes: usize,
    pub subtitle_queue_bytes: usize,
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:7.2} {}:{:7.3} fd={:4} aq={:5}KB vq={:5}KB sq={:5}B",
            self.master_clock,
            self.diff_label,
            self.av_diff,
            self.frame_drops_early + self.frame_drops_late,
            self.audio_queue_bytes / 1024,
            self.video_queue_bytes / 1024,
            self.subtitle_queue_bytes,
        )
    }
}

/// Result of searching for the next stream of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCycle {
    /// Nothing else to switch to.
    Unchanged,
    /// Switch to this stream.
    Switch(usize),
    /// Turn the kind off (subtitles only).
    Disable,
}

/// Finds the stream to switch to when cycling `kind`.
///
/// When video is open and belongs to a program, only streams of that
/// program are considered for the other kinds. Audio streams without a
/// usable format and video attached pictures are skipped.
#[must_use]
pub fn next_stream(
    info: &MediaInfo,
    kind: StreamKind,
    current: Option<usize>,
    open_video: Option<usize>,
) -> StreamCycle {
    let program = match (kind, open_video) {
        (StreamKind::Video, _) | (_, None) => None,
        (_, Some(video)) => info.stream(video).and_then(|s| s.program),
    };
    let candidates: Vec<usize> = info
        .streams
        .iter()
        .filter(|s| program.is_none() || s.program == program)
        .map(|s| s.index)
        .collect();

    let start = current.and_then(|index| candidates.iter().position(|c| *c == index));
    let mut position = start;
    loop {
        let next = position.map_or(0, |p| p + 1);
        let next = if next >= candidates.len() {
            if kind == StreamKind::Subtitle {
                return StreamCycle::Disable;
            }
            if start.is_none() {
                return StreamCycle::Unchanged;
            }
            0
        } else {
            next
        };
        if Some(next) == start {
            return StreamCycle::Unchanged;
        }
        position = Some(next);

        let Some(stream) = info.stream(candidates[next]) else {
            continue;
        };
        if stream.media_type != kind.media_type() {
            continue;
        }
        let usable = match kind {
            StreamKind::Audio => stream.sample_rate != 0 && stream.channels != 0,
            StreamKind::Video => !stream.attached_picture,
            StreamKind::Subtitle => true,
        };
        if usable {
            return StreamCycle::Switch(stream.index);
        }
    }
}

/// Chapter to jump to from position `pos` (seconds), moving by `incr` chapters.
#[must_use]
pub fn chapter_target(chapters: &[Chapter], pos: f64, incr: i32) -> Option<usize> {
    if chapters.is_empty() {
        return None;
    }
    let current = chapters
        .iter()
        .position(|chapter| pos < chapter.start)
        .map_or(chapters.len() as i64, |i| i as i64 - 1);
    let target = (current + i64::from(incr)).max(0);
    usize::try_from(target).ok().filter(|t| *t < chapters.len())
}

/// A playing source.
pub struct Session<B: MediaBackend> {
    info: MediaInfo,
    codecs: B::Codecs,
    config: SessionConfig,
    video: DecoderStage<B::Packet, B::Picture>,
    audio: DecoderStage<B::Packet, AudioBlock<B::Samples>>,
    subtitle: DecoderStage<B::Packet, SubtitleOverlay>,
    routes: Arc<StreamRoutes>,
    control: Arc<ReaderControl>,
    clocks: Arc<Clocks>,
    controls: Arc<PlaybackControls>,
    scheduler: SyncScheduler<B::Picture>,
    audio_device: Option<Box<dyn AudioDevice>>,
    reader: Option<JoinHandle<()>>,
    frame_drops_early: Arc<AtomicU64>,
    seek_by_bytes: bool,
    realtime: bool,
    closed: bool,
}

impl<B: MediaBackend> Session<B> {
    /// Opens `source` and starts playback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Open`] if the source cannot be opened, if neither
    /// audio nor video could be started, or if the reader cannot be spawned.
    pub fn open(
        backend: &B,
        source: &str,
        config: SessionConfig,
        renderer: Box<dyn Renderer>,
        audio_device: Option<Box<dyn AudioDevice>>,
        events: EventSender,
    ) -> Result<Self> {
        let control = Arc::new(ReaderControl::default());
        let (mut demuxer, codecs) = backend
            .open(source, control.abort_handle())
            .map_err(|e| match e {
                Error::Open(_) => e,
                other => Error::Open(format!("{source}: {other}")),
            })?;
        let info = demuxer.info().clone();

        let playback = &config.playback;
        let seek_by_bytes = playback.seek_by_bytes.unwrap_or_else(|| info.prefers_byte_seek());
        let realtime = info.is_realtime();
        let max_frame_duration = info.max_frame_duration();

        if let Some(start) = playback.start_time {
            #[allow(clippy::cast_possible_truncation)]
            let target = (start * MICROS_PER_SECOND) as i64 + info.start_time.unwrap_or(0);
            let request = SeekRequest {
                target,
                min: i64::MIN,
                max: i64::MAX,
                by_bytes: false,
            };
            if let Err(e) = demuxer.seek(&request) {
                warn!("{source}: could not seek to position {start:.3}: {e}");
            }
        }

        let video = DecoderStage::new(StreamKind::Video);
        let audio = DecoderStage::new(StreamKind::Audio);
        let subtitle = DecoderStage::new(StreamKind::Subtitle);

        let clocks = Arc::new(Clocks::new(
            playback.sync,
            audio.packets().serial_handle(),
            video.packets().serial_handle(),
        ));
        let controls = Arc::new(PlaybackControls::new(
            Volume::from_percent(config.audio.volume),
            config.audio.muted,
        ));
        controls.set_framedrop(playback.framedrop);

        let scheduler = SyncScheduler::new(
            Arc::clone(video.frames()),
            Arc::clone(subtitle.frames()),
            Arc::clone(&clocks),
            Arc::clone(&controls),
            codecs.image_converter(),
            renderer,
            playback.framedrop,
            max_frame_duration,
        )
        .with_realtime(realtime);

        let settings = ReaderSettings {
            loop_count: playback.loop_count,
            autoexit: playback.autoexit,
            start_time: playback.start_time,
            duration: playback.duration,
            infinite_buffer: playback.infinite_buffer.unwrap_or(realtime),
        };

        let mut session = Self {
            info,
            codecs,
            config,
            video,
            audio,
            subtitle,
            routes: Arc::new(StreamRoutes::default()),
            control,
            clocks,
            controls,
            scheduler,
            audio_device,
            reader: None,
            frame_drops_early: Arc::new(AtomicU64::new(0)),
            seek_by_bytes,
            realtime,
            closed: false,
        };

        let streams = &session.config.streams;
        let wanted = [
            (StreamKind::Audio, streams.audio_disable, streams.wanted_audio),
            (StreamKind::Video, streams.video_disable, streams.wanted_video),
            (StreamKind::Subtitle, streams.subtitle_disable, streams.wanted_subtitle),
        ];
        for (kind, disabled, wanted_index) in wanted {
            if disabled {
                continue;
            }
            let Some(index) = session.info.best_stream(kind.media_type(), wanted_index) else {
                continue;
            };
            if let Err(e) = session.open_component(kind, index) {
                warn!("could not open {kind} stream {index}: {e}");
            }
        }

        if !session.video.is_open() && !session.audio.is_open() {
            session.close();
            return Err(Error::Open(format!("{source}: no audio or video stream could be opened")));
        }

        session.spawn_reader(demuxer, settings, events)?;
        info!(
            "playing {} ({}), byte seek {}, realtime {}",
            source, session.info.format_name, session.seek_by_bytes, session.realtime
        );
        Ok(session)
    }

    fn spawn_reader(&mut self, demuxer: B::Demuxer, settings: ReaderSettings, events: EventSender) -> Result<()> {
        let feeds = vec![
            StreamFeed {
                kind: StreamKind::Video,
                packets: Arc::clone(self.video.packets()),
                status: Arc::clone(self.video.status()),
                frames: Arc::clone(self.video.frames()) as Arc<dyn FrameBacklog>,
            },
            StreamFeed {
                kind: StreamKind::Audio,
                packets: Arc::clone(self.audio.packets()),
                status: Arc::clone(self.audio.status()),
                frames: Arc::clone(self.audio.frames()) as Arc<dyn FrameBacklog>,
            },
            StreamFeed {
                kind: StreamKind::Subtitle,
                packets: Arc::clone(self.subtitle.packets()),
                status: Arc::clone(self.subtitle.status()),
                frames: Arc::clone(self.subtitle.frames()) as Arc<dyn FrameBacklog>,
            },
        ];
        let reader = ReaderLoop::new(
            demuxer,
            feeds,
            Arc::clone(&self.routes),
            Arc::clone(&self.control),
            Arc::clone(&self.clocks),
            Arc::clone(&self.controls),
            events,
            settings,
        );
        let handle = thread::Builder::new()
            .name("reader".to_string())
            .spawn(move || reader.run());
        match handle {
            Ok(handle) => {
                self.reader = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(Error::Open(format!("could not start reader: {e}")))
            }
        }
    }

    /// Opens stream `index` as the `kind` component and starts its decoder.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is unknown, its codec cannot be
    /// opened, the audio device refuses every format, or the decoder thread
    /// cannot be spawned.
    pub fn open_component(&mut self, kind: StreamKind, index: usize) -> Result<()> {
        let stream = self
            .info
            .stream(index)
            .filter(|s| s.media_type == kind.media_type())
            .cloned()
            .ok_or_else(|| Error::Unsupported(format!("stream {index} is not a {kind} stream")))?;
        let waker = Arc::clone(self.control.waker());

        match kind {
            StreamKind::Video => {
                let codec = self.codecs.video_decoder(&stream)?;
                let harness = DecoderHarness::new(kind, codec, &self.video, waker, stream.time_base)
                    .with_reorder(self.config.playback.decoder_reorder);
                let frames = Arc::clone(self.video.frames());
                let drop_early = self.early_drop_policy();
                let frame_rate = stream.frame_rate;
                self.video.start(index, move || {
                    decoder::run_video(harness, frames, frame_rate, drop_early);
                })?;
                self.routes.set(kind, Some(index));
                self.clocks.set_has_video(true);
                self.control.request_attachments();
            }
            StreamKind::Audio => {
                let device = self
                    .audio_device
                    .as_deref_mut()
                    .ok_or(Error::Audio(crate::error::AudioError::NoDevice))?;
                let target = negotiate(device, stream.channels, stream.sample_rate)?;
                let codec = self.codecs.audio_decoder(&stream)?;
                let mut harness = DecoderHarness::new(kind, codec, &self.audio, waker, stream.time_base);
                if self.info.no_byte_seek {
                    harness = harness.with_start_pts(stream.start_time, stream.time_base);
                }
                let frames = Arc::clone(self.audio.frames());
                self.audio.start(index, move || decoder::run_audio(harness, frames))?;
                self.routes.set(kind, Some(index));
                self.clocks.set_has_audio(true);

                let mut pipeline = AudioPipeline::new(
                    Arc::clone(self.audio.frames()),
                    self.codecs.resampler(),
                    target,
                    Arc::clone(&self.clocks),
                    Arc::clone(&self.controls),
                );
                let started = self
                    .audio_device
                    .as_deref_mut()
                    .map(|device| device.start(Box::new(move |out: &mut [f32]| pipeline.fill(out))));
                if let Some(Err(e)) = started {
                    self.close_component(kind);
                    return Err(e.into());
                }
            }
            StreamKind::Subtitle => {
                let codec = self.codecs.subtitle_decoder(&stream)?;
                let harness = DecoderHarness::subtitles(codec, &self.subtitle, waker, stream.time_base);
                let frames = Arc::clone(self.subtitle.frames());
                self.subtitle
                    .start(index, move || decoder::run_subtitles(harness, frames))?;
                self.routes.set(kind, Some(index));
                self.scheduler.set_subtitles_open(true);
            }
        }
        info!("opened {kind} stream {index} ({})", stream.codec_name);
        Ok(())
    }

    /// Builds the video thread's early-drop check.
    fn early_drop_policy(&self) -> impl FnMut(&FrameInfo) -> bool + Send + 'static {
        let clocks = Arc::clone(&self.clocks);
        let controls = Arc::clone(&self.controls);
        let drops = Arc::clone(&self.frame_drops_early);
        move |frame: &FrameInfo| {
            let master = clocks.master_sync_type();
            let allowed = match controls.framedrop() {
                FrameDropMode::Always => true,
                FrameDropMode::Auto => master != SyncMode::Video,
                FrameDropMode::Never => false,
            };
            if !allowed {
                return false;
            }
            let diff = frame.pts - clocks.master_value();
            let late = !diff.is_nan()
                && diff.abs() < AV_NOSYNC_THRESHOLD
                && diff < 0.0
                && frame.serial == clocks.video.serial();
            if late {
                drops.fetch_add(1, Ordering::Relaxed);
                debug!("early drop of frame at {:.3}", frame.pts);
            }
            late
        }
    }

    /// Stops the `kind` decoder and forgets its stream selection.
    pub fn close_component(&mut self, kind: StreamKind) {
        self.routes.set(kind, None);
        match kind {
            StreamKind::Video => {
                if self.video.is_open() {
                    self.video.abort();
                }
                self.clocks.set_has_video(false);
            }
            StreamKind::Audio => {
                if let Some(device) = self.audio_device.as_deref_mut() {
                    device.close();
                }
                if self.audio.is_open() {
                    self.audio.abort();
                }
                self.clocks.set_has_audio(false);
            }
            StreamKind::Subtitle => {
                if self.subtitle.is_open() {
                    self.subtitle.abort();
                }
                self.scheduler.set_subtitles_open(false);
            }
        }
        debug!("closed {kind} component");
    }

    /// Stops the reader and every decoder. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.control.abort();
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("reader thread panicked");
            }
        }
        for kind in [StreamKind::Audio, StreamKind::Video, StreamKind::Subtitle] {
            self.close_component(kind);
        }
        info!("session closed");
    }

    #[must_use]
    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    #[must_use]
    pub fn clocks(&self) -> &Arc<Clocks> {
        &self.clocks
    }

    #[must_use]
    pub fn controls(&self) -> &Arc<PlaybackControls> {
        &self.controls
    }

    #[must_use]
    pub fn stream_index(&self, kind: StreamKind) -> Option<usize> {
        match kind {
            StreamKind::Video => self.video.stream_index(),
            StreamKind::Audio => self.audio.stream_index(),
            StreamKind::Subtitle => self.subtitle.stream_index(),
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.controls.is_paused()
    }

    #[must_use]
    pub fn seek_interval(&self) -> f64 {
        self.config.playback.seek_interval
    }

    #[must_use]
    pub fn show_status(&self) -> bool {
        self.config.playback.show_status
    }

    pub fn renderer_mut(&mut self) -> &mut dyn Renderer {
        self.scheduler.renderer_mut()
    }

    /// Runs one video refresh tick.
    pub fn refresh(&mut self, remaining_time: &mut f64) {
        let levels = QueueLevels {
            video: self.video.is_open().then(|| self.video.packets().nb_packets()),
            audio: self.audio.is_open().then(|| self.audio.packets().nb_packets()),
        };
        self.scheduler.refresh(remaining_time, levels);
    }

    /// Redraws the last frame on the next tick.
    pub fn force_refresh(&mut self) {
        self.scheduler.force_refresh();
    }

    pub fn toggle_pause(&mut self) {
        self.scheduler.toggle_pause();
        debug!("paused: {}", self.controls.is_paused());
    }

    /// Shows one frame, then pauses.
    pub fn step_to_next_frame(&mut self) {
        self.scheduler.step_to_next_frame();
    }

    pub fn toggle_mute(&mut self) {
        self.controls.set_muted(!self.controls.is_muted());
    }

    /// Changes the volume by `step_db` decibels in direction `sign`.
    pub fn update_volume(&mut self, sign: i8, step_db: f64) {
        let volume = self.controls.volume().step_db(sign, step_db);
        self.controls.set_volume(volume);
        debug!("volume {} ({:.1} dB)", volume.level(), volume.decibels());
    }

    pub fn set_framedrop(&mut self, framedrop: FrameDropMode) {
        self.controls.set_framedrop(framedrop);
        self.scheduler.set_framedrop(framedrop);
    }

    /// Requests a seek unless one is already pending.
    pub fn stream_seek(&mut self, pos: i64, rel: i64, by_bytes: bool) {
        self.control.request_seek(PendingSeek {
            target: pos,
            rel,
            by_bytes,
        });
    }

    /// Seeks `incr` seconds relative to the current position.
    pub fn seek_relative(&mut self, incr: f64) {
        if self.seek_by_bytes {
            let pos = self
                .video
                .is_open()
                .then(|| self.video.frames().last_shown_position())
                .flatten()
                .or_else(|| {
                    self.audio
                        .is_open()
                        .then(|| self.audio.frames().last_shown_position())
                        .flatten()
                })
                .or_else(|| self.control.byte_position())
                .unwrap_or(0);
            let bytes_per_sec = if self.info.bit_rate > 0 {
                self.info.bit_rate as f64 / 8.0
            } else {
                FALLBACK_BYTES_PER_SEC
            };
            let incr = incr * bytes_per_sec;
            #[allow(clippy::cast_possible_truncation)]
            self.stream_seek(pos + incr as i64, incr as i64, true);
        } else {
            let mut pos = self.clocks.master_value();
            if pos.is_nan() {
                pos = self.control.last_seek_target() as f64 / MICROS_PER_SECOND;
            }
            pos += incr;
            if let Some(start) = self.info.start_time {
                pos = pos.max(start as f64 / MICROS_PER_SECOND);
            }
            #[allow(clippy::cast_possible_truncation)]
            self.stream_seek(
                (pos * MICROS_PER_SECOND) as i64,
                (incr * MICROS_PER_SECOND) as i64,
                false,
            );
        }
    }

    /// Seeks to `frac` (0..=1) of the media.
    pub fn seek_fraction(&mut self, frac: f64) {
        let frac = frac.clamp(0.0, 1.0);
        if self.seek_by_bytes || self.info.duration.is_none_or(|d| d <= 0) {
            let size = self.info.size_bytes.unwrap_or(0);
            #[allow(clippy::cast_possible_truncation)]
            self.stream_seek((size as f64 * frac) as i64, 0, true);
        } else {
            let duration = self.info.duration.unwrap_or(0) as f64;
            #[allow(clippy::cast_possible_truncation)]
            let ts = (frac * duration) as i64 + self.info.start_time.unwrap_or(0);
            info!("seeking to {:.0}% ({:.2}s)", frac * 100.0, ts as f64 / MICROS_PER_SECOND);
            self.stream_seek(ts, 0, false);
        }
    }

    /// Jumps `incr` chapters from the current position. Returns false without chapters.
    pub fn seek_chapter(&mut self, incr: i32) -> bool {
        let pos = self.clocks.master_value();
        let Some(target) = chapter_target(&self.info.chapters, pos, incr) else {
            return !self.info.chapters.is_empty();
        };
        let start = self.info.chapters[target].start;
        debug!("seeking to chapter {target}");
        #[allow(clippy::cast_possible_truncation)]
        self.stream_seek((start * MICROS_PER_SECOND) as i64, 0, false);
        true
    }

    /// Switches `kind` to the next suitable stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the new stream cannot be opened; the old one is closed either way.
    pub fn cycle_channel(&mut self, kind: StreamKind) -> Result<()> {
        let old = self.stream_index(kind);
        let next = match next_stream(&self.info, kind, old, self.video.stream_index()) {
            StreamCycle::Unchanged => return Ok(()),
            StreamCycle::Switch(index) => Some(index),
            StreamCycle::Disable => None,
        };
        info!("switching {kind} stream from {old:?} to {next:?}");
        self.close_component(kind);
        match next {
            Some(index) => self.open_component(kind, index),
            None => Ok(()),
        }
    }

    /// Current status line values.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let master = self.clocks.master_value();
        let (diff_label, av_diff) = match (self.audio.is_open(), self.video.is_open()) {
            (true, true) => ("A-V", self.clocks.audio.get() - self.clocks.video.get()),
            (false, true) => ("M-V", master - self.clocks.video.get()),
            (true, false) => ("M-A", master - self.clocks.audio.get()),
            (false, false) => ("   ", 0.0),
        };
        SessionStats {
            master_clock: master,
            diff_label,
            av_diff,
            frame_drops_early: self.frame_drops_early.load(Ordering::Relaxed),
            frame_drops_late: self.scheduler.frame_drops_late(),
            audio_queue_bytes: self.audio.packets().size(),
            video_queue_bytes: self.video.packets().size(),
            subtitle_queue_bytes: self.subtitle.packets().size(),
        }
    }

    /// Whether the source has more than one chapter.
    #[must_use]
    pub fn has_chapters(&self) -> bool {
        self.info.chapters.len() > 1
    }

    /// Media type of stream `index`, if it exists.
    #[must_use]
    pub fn media_type(&self, index: usize) -> Option<MediaType> {
        self.info.stream(index).map(|s| s.media_type)
    }
}

impl<B: MediaBackend> Drop for Session<B> {
    fn drop(&mut self) {
        self.close();
    }
}
