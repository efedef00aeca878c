// SPDX-License-Identifier: MPL-2.0
//! Reader thread: demuxer to packet queues.
//!
//! Each iteration of [`ReaderLoop`] handles, in order: pause changes, a
//! pending seek, attached-picture re-queue, buffer backpressure, the
//! completion/loop check, and finally one demuxer read. Waiting happens on
//! [`ReadWaker`] with a short timeout so seeks and aborts are noticed
//! promptly.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};

use super::controls::PlaybackControls;
use super::decoder::{DecoderStatus, StreamKind};
use super::event::{EventSender, PlayerEvent, TerminationReason};
use super::frame_queue::FrameQueue;
use super::packet_queue::{CompressedUnit, PacketQueue};
use super::serial::AbortHandle;
use super::sync::Clocks;
use super::time_units::MICROS_PER_SECOND;
use crate::application::port::{Demuxer, ReadOutcome, SeekRequest};
use crate::config::{ENOUGH_QUEUE_DURATION_SECS, MAX_QUEUE_SIZE, MIN_FRAMES, READ_RETRY_WAIT_MS};

/// Wakes the reader when a decoder runs dry or a seek is requested.
#[derive(Debug, Default)]
pub struct ReadWaker {
    lock: Mutex<()>,
    cond: Condvar,
}

impl ReadWaker {
    pub fn notify(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_one();
    }

    /// Waits for a notification or until `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) {
        let mut guard = self.lock.lock();
        let _ = self.cond.wait_for(&mut guard, timeout);
    }
}

/// A seek waiting for the reader, in microseconds or bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSeek {
    pub target: i64,
    /// Signed distance from the previous position; bounds the search window.
    pub rel: i64,
    pub by_bytes: bool,
}

impl PendingSeek {
    /// Search window: forward seeks never land before the old position, backward ones never after it.
    #[must_use]
    pub fn request(&self) -> SeekRequest {
        let min = if self.rel > 0 {
            self.target - self.rel + 2
        } else {
            i64::MIN
        };
        let max = if self.rel < 0 {
            self.target - self.rel - 2
        } else {
            i64::MAX
        };
        SeekRequest {
            target: self.target,
            min,
            max,
            by_bytes: self.by_bytes,
        }
    }
}

/// Requests from the presentation thread to the reader.
#[derive(Debug)]
pub struct ReaderControl {
    abort: AbortHandle,
    seek: Mutex<Option<PendingSeek>>,
    last_seek_target: AtomicI64,
    /// Demuxer I/O position after the last read, -1 when unknown.
    byte_position: AtomicI64,
    queue_attachments: AtomicBool,
    waker: Arc<ReadWaker>,
}

impl Default for ReaderControl {
    fn default() -> Self {
        Self {
            abort: AbortHandle::new(false),
            seek: Mutex::new(None),
            last_seek_target: AtomicI64::new(0),
            byte_position: AtomicI64::new(-1),
            queue_attachments: AtomicBool::new(true),
            waker: Arc::new(ReadWaker::default()),
        }
    }
}

impl ReaderControl {
    /// Records a seek unless one is already pending. Returns whether it was accepted.
    pub fn request_seek(&self, seek: PendingSeek) -> bool {
        let mut pending = self.seek.lock();
        if pending.is_some() {
            return false;
        }
        *pending = Some(seek);
        self.last_seek_target.store(seek.target, Ordering::Relaxed);
        drop(pending);
        self.waker.notify();
        true
    }

    #[must_use]
    pub fn has_pending_seek(&self) -> bool {
        self.seek.lock().is_some()
    }

    /// Target of the most recent seek request.
    #[must_use]
    pub fn last_seek_target(&self) -> i64 {
        self.last_seek_target.load(Ordering::Relaxed)
    }

    /// Demuxer byte position as of the last read.
    #[must_use]
    pub fn byte_position(&self) -> Option<i64> {
        let pos = self.byte_position.load(Ordering::Relaxed);
        (pos >= 0).then_some(pos)
    }

    /// Asks the reader to re-send the attached picture.
    pub fn request_attachments(&self) {
        self.queue_attachments.store(true, Ordering::Release);
    }

    /// Stops the reader and interrupts blocking demuxer I/O.
    pub fn abort(&self) {
        self.abort.set(true);
        self.waker.notify();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Flag polled by the demuxer during blocking I/O.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    #[must_use]
    pub fn waker(&self) -> &Arc<ReadWaker> {
        &self.waker
    }

    fn take_seek(&self) -> Option<PendingSeek> {
        self.seek.lock().take()
    }
}

/// Stream index currently open for each kind, shared with the reader.
#[derive(Debug)]
pub struct StreamRoutes {
    indices: [AtomicI64; 3],
}

impl Default for StreamRoutes {
    fn default() -> Self {
        Self {
            indices: [AtomicI64::new(-1), AtomicI64::new(-1), AtomicI64::new(-1)],
        }
    }
}

impl StreamRoutes {
    fn slot(kind: StreamKind) -> usize {
        match kind {
            StreamKind::Video => 0,
            StreamKind::Audio => 1,
            StreamKind::Subtitle => 2,
        }
    }

    #[must_use]
    pub fn get(&self, kind: StreamKind) -> Option<usize> {
        usize::try_from(self.indices[Self::slot(kind)].load(Ordering::Acquire)).ok()
    }

    pub fn set(&self, kind: StreamKind, index: Option<usize>) {
        let raw = index.and_then(|i| i64::try_from(i).ok()).unwrap_or(-1);
        self.indices[Self::slot(kind)].store(raw, Ordering::Release);
    }

    /// Kind of the open stream with `index`, if any.
    #[must_use]
    pub fn kind_of(&self, index: usize) -> Option<StreamKind> {
        StreamKind::ALL.into_iter().find(|kind| self.get(*kind) == Some(index))
    }
}

/// Frames decoded but not yet consumed, independent of payload type.
pub trait FrameBacklog: Send + Sync {
    fn nb_remaining(&self) -> usize;
}

impl<T: Send> FrameBacklog for FrameQueue<T> {
    fn nb_remaining(&self) -> usize {
        FrameQueue::nb_remaining(self)
    }
}

/// The reader's view of one stream component.
pub struct StreamFeed<P> {
    pub kind: StreamKind,
    pub packets: Arc<PacketQueue<P>>,
    pub status: Arc<DecoderStatus>,
    pub frames: Arc<dyn FrameBacklog>,
}

impl<P> StreamFeed<P> {
    fn is_exhausted(&self) -> bool {
        self.status.finished() == self.packets.serial() && self.frames.nb_remaining() == 0
    }
}

/// Playback-range and looping settings resolved at open time.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderSettings {
    /// Play count; 0 loops forever.
    pub loop_count: u32,
    pub autoexit: bool,
    /// Start position in seconds.
    pub start_time: Option<f64>,
    /// Play duration in seconds from `start_time`.
    pub duration: Option<f64>,
    /// Disables queue-full backpressure.
    pub infinite_buffer: bool,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            loop_count: 1,
            autoexit: false,
            start_time: None,
            duration: None,
            infinite_buffer: false,
        }
    }
}

/// What one iteration of the reader did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStep {
    /// A unit was read (and routed or discarded).
    Read,
    /// Nothing to do right now; the reader waited briefly.
    Waited,
    /// The reader must exit.
    Stop,
}

/// Reader thread state.
pub struct ReaderLoop<D: Demuxer> {
    demuxer: D,
    feeds: Vec<StreamFeed<D::Packet>>,
    routes: Arc<StreamRoutes>,
    control: Arc<ReaderControl>,
    clocks: Arc<Clocks>,
    controls: Arc<PlaybackControls>,
    events: EventSender,
    settings: ReaderSettings,
    last_paused: bool,
    eof: bool,
    wait: Duration,
}

impl<D: Demuxer> ReaderLoop<D> {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        demuxer: D,
        feeds: Vec<StreamFeed<D::Packet>>,
        routes: Arc<StreamRoutes>,
        control: Arc<ReaderControl>,
        clocks: Arc<Clocks>,
        controls: Arc<PlaybackControls>,
        events: EventSender,
        settings: ReaderSettings,
    ) -> Self {
        Self {
            demuxer,
            feeds,
            routes,
            control,
            clocks,
            controls,
            events,
            settings,
            last_paused: false,
            eof: false,
            wait: Duration::from_millis(READ_RETRY_WAIT_MS),
        }
    }

    /// Runs until aborted or a fatal condition occurs.
    pub fn run(mut self) {
        info!("reader started for {}", self.demuxer.info().url);
        while self.iterate() != ReadStep::Stop {}
        info!("reader stopped");
    }

    fn open_feeds(&self) -> impl Iterator<Item = &StreamFeed<D::Packet>> {
        self.feeds.iter().filter(|feed| self.routes.get(feed.kind).is_some())
    }

    fn feed(&self, kind: StreamKind) -> Option<&StreamFeed<D::Packet>> {
        self.feeds.iter().find(|feed| feed.kind == kind)
    }

    fn terminate(&self, reason: TerminationReason) {
        if self.events.send(PlayerEvent::Terminated { reason }).is_err() {
            debug!("event receiver gone");
        }
    }

    /// Runs one reader iteration.
    pub fn iterate(&mut self) -> ReadStep {
        if self.control.is_aborted() {
            return ReadStep::Stop;
        }

        let paused = self.controls.is_paused();
        if paused != self.last_paused {
            self.last_paused = paused;
            if paused {
                self.demuxer.pause();
            } else {
                self.demuxer.resume();
            }
        }

        if let Some(seek) = self.control.take_seek() {
            self.process_seek(seek);
        }

        if self.control.queue_attachments.swap(false, Ordering::AcqRel) {
            self.queue_attached_picture();
        }

        if !self.settings.infinite_buffer && self.buffers_full() {
            self.control.waker.wait_timeout(self.wait);
            return ReadStep::Waited;
        }

        if !self.controls.is_paused() && self.playback_complete() {
            if self.settings.loop_count != 1
                && (self.settings.loop_count == 0 || {
                    self.settings.loop_count -= 1;
                    self.settings.loop_count != 0
                })
            {
                let start = self.settings.start_time.unwrap_or(0.0);
                #[allow(clippy::cast_possible_truncation)]
                let target = (start * MICROS_PER_SECOND) as i64;
                debug!("looping back to {start:.3}s");
                self.control.request_seek(PendingSeek {
                    target,
                    rel: 0,
                    by_bytes: false,
                });
            } else if self.settings.autoexit {
                self.terminate(TerminationReason::EndOfPlayback);
                return ReadStep::Stop;
            }
        }

        match self.demuxer.read_unit() {
            ReadOutcome::Unit(unit) => {
                self.eof = false;
                if let Some(pos) = self.demuxer.byte_position().or(unit.pos) {
                    self.control.byte_position.store(pos, Ordering::Relaxed);
                }
                self.route(unit);
                ReadStep::Read
            }
            ReadOutcome::EndOfStream => {
                if !self.eof {
                    self.inject_sentinels();
                    self.eof = true;
                }
                self.control.waker.wait_timeout(self.wait);
                ReadStep::Waited
            }
            ReadOutcome::Retry => {
                self.control.waker.wait_timeout(self.wait);
                ReadStep::Waited
            }
            ReadOutcome::Fatal(message) => {
                error!("read failed: {message}");
                self.terminate(TerminationReason::ReadError(message));
                ReadStep::Stop
            }
        }
    }

    fn process_seek(&mut self, seek: PendingSeek) {
        let request = seek.request();
        match self.demuxer.seek(&request) {
            Ok(()) => {
                for feed in self.open_feeds() {
                    feed.packets.flush();
                    feed.packets.put_flush();
                }
                if seek.by_bytes {
                    self.clocks.external.set(f64::NAN, 0);
                } else {
                    self.clocks.external.set(seek.target as f64 / MICROS_PER_SECOND, 0);
                }
                debug!("seek to {} done", seek.target);
            }
            Err(e) => warn!("{}: error while seeking: {e}", self.demuxer.info().url),
        }
        self.control.queue_attachments.store(true, Ordering::Release);
        self.eof = false;
        if self.controls.is_paused() {
            self.controls.request_step();
        }
    }

    fn queue_attached_picture(&self) {
        let Some(index) = self.routes.get(StreamKind::Video) else {
            return;
        };
        let Some(feed) = self.feed(StreamKind::Video) else {
            return;
        };
        if let Some(unit) = self.demuxer.attached_picture(index) {
            feed.packets.put(unit);
            feed.packets.put_sentinel(index);
        }
    }

    fn is_attached_picture(&self, index: usize) -> bool {
        self.demuxer
            .info()
            .stream(index)
            .is_some_and(|stream| stream.attached_picture)
    }

    fn has_enough_packets(&self, feed: &StreamFeed<D::Packet>) -> bool {
        let Some(index) = self.routes.get(feed.kind) else {
            return true;
        };
        if feed.packets.is_aborted() || self.is_attached_picture(index) {
            return true;
        }
        let stats = feed.packets.stats();
        let time_base = self
            .demuxer
            .info()
            .stream(index)
            .map_or(0.0, |stream| stream.time_base.as_f64());
        stats.nb_packets > MIN_FRAMES
            && (stats.duration == 0 || time_base * stats.duration as f64 > ENOUGH_QUEUE_DURATION_SECS)
    }

    fn buffers_full(&self) -> bool {
        let total: usize = self.feeds.iter().map(|feed| feed.packets.size()).sum();
        total > MAX_QUEUE_SIZE || self.feeds.iter().all(|feed| self.has_enough_packets(feed))
    }

    /// Every open audio/video stream is drained at the live epoch and fully consumed.
    fn playback_complete(&self) -> bool {
        [StreamKind::Audio, StreamKind::Video].into_iter().all(|kind| {
            self.routes.get(kind).is_none() || self.feed(kind).is_some_and(StreamFeed::is_exhausted)
        })
    }

    fn inject_sentinels(&self) {
        for feed in self.open_feeds() {
            if let Some(index) = self.routes.get(feed.kind) {
                feed.packets.put_sentinel(index);
            }
        }
        debug!("end of input, decoders draining");
    }

    fn in_play_range(&self, unit: &CompressedUnit<D::Packet>) -> bool {
        let Some(duration) = self.settings.duration else {
            return true;
        };
        let Some(stream) = self.demuxer.info().stream(unit.stream_index) else {
            return true;
        };
        let Some(ts) = unit.pts.or(unit.dts) else {
            return true;
        };
        let stream_start = stream.start_time.unwrap_or(0);
        let offset = stream.time_base.to_secs(ts - stream_start) - self.settings.start_time.unwrap_or(0.0);
        offset <= duration
    }

    fn route(&self, unit: CompressedUnit<D::Packet>) {
        let Some(kind) = self.routes.kind_of(unit.stream_index) else {
            return;
        };
        if !self.in_play_range(&unit) {
            return;
        }
        if kind == StreamKind::Video && self.is_attached_picture(unit.stream_index) {
            return;
        }
        if let Some(feed) = self.feed(kind) {
            feed.packets.put(unit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::port::{MediaInfo, MediaType, StreamInfo};
    use crate::config::SyncMode;
    use crate::error::{Error, Result};
    use crate::player::event::{self, EventReceiver};
    use crate::player::packet_queue::{Dequeued, QueuedPacket};
    use crate::player::time_units::TimeBase;
    use std::collections::VecDeque;

    struct ScriptedDemuxer {
        info: MediaInfo,
        script: VecDeque<ReadOutcome<u32>>,
        seeks: Arc<Mutex<Vec<SeekRequest>>>,
        fail_seek: bool,
        cover: Option<u32>,
    }

    impl Demuxer for ScriptedDemuxer {
        type Packet = u32;

        fn info(&self) -> &MediaInfo {
            &self.info
        }

        fn read_unit(&mut self) -> ReadOutcome<u32> {
            self.script.pop_front().unwrap_or(ReadOutcome::EndOfStream)
        }

        fn seek(&mut self, request: &SeekRequest) -> Result<()> {
            self.seeks.lock().push(*request);
            if self.fail_seek {
                Err(Error::Decode("not seekable".into()))
            } else {
                Ok(())
            }
        }

        fn attached_picture(&self, stream_index: usize) -> Option<CompressedUnit<u32>> {
            self.cover.map(|tag| CompressedUnit::new(stream_index, tag, 64))
        }
    }

    struct Harness {
        reader: ReaderLoop<ScriptedDemuxer>,
        video: Arc<PacketQueue<u32>>,
        audio: Arc<PacketQueue<u32>>,
        video_frames: Arc<FrameQueue<u32>>,
        video_status: Arc<DecoderStatus>,
        audio_status: Arc<DecoderStatus>,
        control: Arc<ReaderControl>,
        clocks: Arc<Clocks>,
        controls: Arc<PlaybackControls>,
        events: EventReceiver,
        seeks: Arc<Mutex<Vec<SeekRequest>>>,
    }

    fn media_info() -> MediaInfo {
        let tb = TimeBase::new(1, 1000);
        MediaInfo {
            url: "memory:test".into(),
            streams: vec![
                StreamInfo::new(0, MediaType::Video, tb),
                StreamInfo::new(1, MediaType::Audio, tb),
            ],
            ..MediaInfo::default()
        }
    }

    fn harness(script: Vec<ReadOutcome<u32>>, settings: ReaderSettings) -> Harness {
        let video = Arc::new(PacketQueue::new());
        let audio = Arc::new(PacketQueue::new());
        video.start();
        audio.start();
        let video_frames = Arc::new(FrameQueue::new(3, true, video.abort_handle(), video.serial_handle()));
        let audio_frames = Arc::new(FrameQueue::<u32>::new(9, true, audio.abort_handle(), audio.serial_handle()));
        let video_status = Arc::new(DecoderStatus::default());
        let audio_status = Arc::new(DecoderStatus::default());
        let routes = Arc::new(StreamRoutes::default());
        routes.set(StreamKind::Video, Some(0));
        routes.set(StreamKind::Audio, Some(1));
        let control = Arc::new(ReaderControl::default());
        let clocks = Arc::new(Clocks::new(SyncMode::Audio, audio.serial_handle(), video.serial_handle()));
        let controls = Arc::new(PlaybackControls::default());
        let (tx, rx) = event::channel();
        let seeks = Arc::new(Mutex::new(Vec::new()));
        let feeds = vec![
            StreamFeed {
                kind: StreamKind::Video,
                packets: Arc::clone(&video),
                status: Arc::clone(&video_status),
                frames: Arc::clone(&video_frames) as Arc<dyn FrameBacklog>,
            },
            StreamFeed {
                kind: StreamKind::Audio,
                packets: Arc::clone(&audio),
                status: Arc::clone(&audio_status),
                frames: audio_frames as Arc<dyn FrameBacklog>,
            },
        ];
        let demuxer = ScriptedDemuxer {
            info: media_info(),
            script: script.into(),
            seeks: Arc::clone(&seeks),
            fail_seek: false,
            cover: None,
        };
        let reader = ReaderLoop::new(
            demuxer,
            feeds,
            routes,
            Arc::clone(&control),
            Arc::clone(&clocks),
            Arc::clone(&controls),
            tx,
            settings,
        );
        Harness {
            reader,
            video,
            audio,
            video_frames,
            video_status,
            audio_status,
            control,
            clocks,
            controls,
            events: rx,
            seeks,
        }
    }

    fn unit(stream: usize, pts: i64) -> ReadOutcome<u32> {
        ReadOutcome::Unit(CompressedUnit::new(stream, 0, 100).with_pts(Some(pts)).with_duration(40))
    }

    fn drain_flush(queue: &PacketQueue<u32>) {
        assert!(matches!(
            queue.get(false),
            Dequeued::Packet {
                packet: QueuedPacket::Flush,
                ..
            }
        ));
    }

    #[test]
    fn units_are_routed_by_stream_index() {
        let mut h = harness(vec![unit(0, 0), unit(1, 0), unit(7, 0)], ReaderSettings::default());
        drain_flush(&h.video);
        drain_flush(&h.audio);
        for _ in 0..3 {
            assert_eq!(h.reader.iterate(), ReadStep::Read);
        }
        assert_eq!(h.video.nb_packets(), 1);
        assert_eq!(h.audio.nb_packets(), 1);
    }

    #[test]
    fn seek_flushes_and_bumps_each_queue_once() {
        let mut h = harness(vec![unit(0, 0), unit(1, 0), unit(0, 40)], ReaderSettings::default());
        for _ in 0..3 {
            h.reader.iterate();
        }
        let video_serial = h.video.serial();
        let audio_serial = h.audio.serial();

        assert!(h.control.request_seek(PendingSeek {
            target: 5_000_000,
            rel: 5_000_000,
            by_bytes: false,
        }));
        h.reader.process_seek(h.control.take_seek().expect("pending"));

        assert_eq!(h.video.serial(), video_serial + 1);
        assert_eq!(h.audio.serial(), audio_serial + 1);
        assert_eq!(h.video.nb_packets(), 1);
        assert_eq!(h.audio.nb_packets(), 1);
        drain_flush(&h.video);
        drain_flush(&h.audio);
        assert!((h.clocks.external.get() - 5.0).abs() < 0.05);
        assert_eq!(h.clocks.external.serial(), 0);

        let seeks = h.seeks.lock();
        assert_eq!(seeks.len(), 1);
        assert_eq!(seeks[0].min, 2);
        assert_eq!(seeks[0].max, i64::MAX);
    }

    #[test]
    fn only_one_seek_pending_at_a_time() {
        let h = harness(Vec::new(), ReaderSettings::default());
        let seek = PendingSeek {
            target: 1,
            rel: 0,
            by_bytes: false,
        };
        assert!(h.control.request_seek(seek));
        assert!(!h.control.request_seek(seek));
        assert!(h.control.has_pending_seek());
    }

    #[test]
    fn byte_seek_makes_external_clock_unknown() {
        let mut h = harness(Vec::new(), ReaderSettings::default());
        h.reader.process_seek(PendingSeek {
            target: 4096,
            rel: -100,
            by_bytes: true,
        });
        assert!(h.clocks.external.get().is_nan());
        assert_eq!(h.seeks.lock()[0].max, 4096 + 100 - 2);
    }

    #[test]
    fn failed_seek_leaves_queues_alone() {
        let mut h = harness(vec![unit(0, 0)], ReaderSettings::default());
        h.reader.demuxer.fail_seek = true;
        h.reader.iterate();
        let serial = h.video.serial();
        let before = h.video.nb_packets();
        h.reader.process_seek(PendingSeek {
            target: 0,
            rel: 0,
            by_bytes: false,
        });
        assert_eq!(h.video.serial(), serial);
        assert_eq!(h.video.nb_packets(), before);
    }

    #[test]
    fn seek_while_paused_requests_a_step() {
        let mut h = harness(Vec::new(), ReaderSettings::default());
        h.controls.set_paused(true);
        h.reader.process_seek(PendingSeek {
            target: 0,
            rel: 0,
            by_bytes: false,
        });
        assert!(h.controls.take_step_request());
    }

    #[test]
    fn end_of_stream_injects_sentinels_once() {
        let mut h = harness(Vec::new(), ReaderSettings::default());
        drain_flush(&h.video);
        drain_flush(&h.audio);
        assert_eq!(h.reader.iterate(), ReadStep::Waited);
        assert_eq!(h.reader.iterate(), ReadStep::Waited);
        assert_eq!(h.video.nb_packets(), 1);
        assert_eq!(h.audio.nb_packets(), 1);
        match h.video.get(false) {
            Dequeued::Packet {
                packet: QueuedPacket::Unit(unit),
                ..
            } => assert!(unit.is_sentinel()),
            other => panic!("expected sentinel, got {other:?}"),
        }
    }

    #[test]
    fn fatal_error_stops_and_reports() {
        let mut h = harness(vec![ReadOutcome::Fatal("broken pipe".into())], ReaderSettings::default());
        assert_eq!(h.reader.iterate(), ReadStep::Stop);
        assert_eq!(
            h.events.try_recv().expect("event"),
            PlayerEvent::Terminated {
                reason: TerminationReason::ReadError("broken pipe".into())
            }
        );
    }

    #[test]
    fn transient_error_retries() {
        let mut h = harness(vec![ReadOutcome::Retry, unit(0, 0)], ReaderSettings::default());
        assert_eq!(h.reader.iterate(), ReadStep::Waited);
        assert_eq!(h.reader.iterate(), ReadStep::Read);
    }

    #[test]
    fn full_buffers_apply_backpressure() {
        let script = (0..=MIN_FRAMES as i64 + 1)
            .flat_map(|i| [unit(0, i * 40), unit(1, i * 40)])
            .collect();
        let mut h = harness(script, ReaderSettings::default());
        let mut waited = false;
        for _ in 0..(2 * MIN_FRAMES + 8) {
            if h.reader.iterate() == ReadStep::Waited {
                waited = true;
                break;
            }
        }
        assert!(waited);
        assert!(h.video.nb_packets() > MIN_FRAMES);
    }

    #[test]
    fn infinite_buffer_disables_backpressure() {
        let script: Vec<_> = (0..60).flat_map(|i| [unit(0, i * 40), unit(1, i * 40)]).collect();
        let settings = ReaderSettings {
            infinite_buffer: true,
            ..ReaderSettings::default()
        };
        let mut h = harness(script, settings);
        for _ in 0..120 {
            assert_eq!(h.reader.iterate(), ReadStep::Read);
        }
    }

    #[test]
    fn play_range_filters_late_units() {
        let settings = ReaderSettings {
            start_time: Some(1.0),
            duration: Some(2.0),
            ..ReaderSettings::default()
        };
        let mut h = harness(vec![unit(0, 2500), unit(0, 3500)], settings);
        drain_flush(&h.video);
        h.reader.iterate();
        h.reader.iterate();
        assert_eq!(h.video.nb_packets(), 1);
    }

    fn finish_streams(h: &Harness) {
        h.video_status.set_finished(h.video.serial());
        h.audio_status.set_finished(h.audio.serial());
    }

    #[test]
    fn completion_with_autoexit_terminates() {
        let settings = ReaderSettings {
            autoexit: true,
            ..ReaderSettings::default()
        };
        let mut h = harness(Vec::new(), settings);
        finish_streams(&h);
        assert_eq!(h.video_frames.nb_remaining(), 0);
        assert_eq!(h.reader.iterate(), ReadStep::Stop);
        assert_eq!(
            h.events.try_recv().expect("event"),
            PlayerEvent::Terminated {
                reason: TerminationReason::EndOfPlayback
            }
        );
    }

    #[test]
    fn completion_with_loop_seeks_to_start() {
        let settings = ReaderSettings {
            loop_count: 0,
            start_time: Some(2.0),
            ..ReaderSettings::default()
        };
        let mut h = harness(Vec::new(), settings);
        finish_streams(&h);
        h.reader.iterate();
        assert!(h.control.has_pending_seek());
        assert_eq!(h.control.last_seek_target(), 2_000_000);
    }

    #[test]
    fn loop_count_is_consumed() {
        let settings = ReaderSettings {
            loop_count: 2,
            ..ReaderSettings::default()
        };
        let mut h = harness(Vec::new(), settings);
        finish_streams(&h);
        h.reader.iterate();
        assert!(h.control.has_pending_seek());
        assert_eq!(h.reader.settings.loop_count, 1);

        // The replay is the last one.
        h.reader.process_seek(h.control.take_seek().expect("pending"));
        finish_streams(&h);
        h.reader.iterate();
        assert!(!h.control.has_pending_seek());
    }

    #[test]
    fn attached_picture_is_queued_with_sentinel() {
        let mut h = harness(Vec::new(), ReaderSettings::default());
        h.reader.demuxer.info.streams[0].attached_picture = true;
        h.reader.demuxer.cover = Some(9);
        drain_flush(&h.video);
        h.reader.iterate();
        // Cover, its sentinel, then the end-of-input sentinel.
        assert_eq!(h.video.nb_packets(), 3);
    }

    #[test]
    fn abort_stops_reader() {
        let mut h = harness(vec![unit(0, 0)], ReaderSettings::default());
        h.control.abort();
        assert_eq!(h.reader.iterate(), ReadStep::Stop);
        assert!(h.control.abort_handle().is_aborted());
    }

    #[test]
    fn routes_map_indices_to_kinds() {
        let routes = StreamRoutes::default();
        assert_eq!(routes.kind_of(3), None);
        routes.set(StreamKind::Subtitle, Some(3));
        assert_eq!(routes.kind_of(3), Some(StreamKind::Subtitle));
        routes.set(StreamKind::Subtitle, None);
        assert_eq!(routes.get(StreamKind::Subtitle), None);
    }

    #[test]
    fn pause_changes_reach_demuxer_hook() {
        let mut h = harness(vec![unit(0, 0), unit(0, 40)], ReaderSettings::default());
        h.controls.set_paused(true);
        h.reader.iterate();
        assert!(h.reader.last_paused);
        h.controls.set_paused(false);
        h.reader.iterate();
        assert!(!h.reader.last_paused);
    }

    #[test]
    fn waker_wait_times_out() {
        let waker = ReadWaker::default();
        let start = std::time::Instant::now();
        waker.wait_timeout(Duration::from_millis(5));
        assert!(start.elapsed() >= Duration::from_millis(4));
    }
}
