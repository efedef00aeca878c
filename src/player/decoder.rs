// SPDX-License-Identifier: MPL-2.0
//! Decoder harness: packet queue in, decoded frames out.
//!
//! Each elementary stream runs one [`DecoderHarness`] on its own thread.
//! The harness alternates between two phases:
//!
//! 1. Drain: while the last accepted packet belongs to the live epoch, pull
//!    decoded output and normalize its timestamps.
//! 2. Feed: take the next packet of the live epoch (or the one the codec
//!    refused earlier) and submit it.
//!
//! Packets and frames of a stale epoch never leave the harness.
//!
//! [`DecoderStage`] bundles the queues, status and thread of one stream and
//! implements the abort sequence.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, warn};

use super::audio::AudioBlock;
use super::frame_queue::{Frame, FrameInfo, FrameQueue};
use super::packet_queue::{CompressedUnit, Dequeued, PacketQueue, QueuedPacket};
use super::reader::ReadWaker;
use super::time_units::{TimeBase, MICROS_PER_SECOND};
use crate::application::port::{
    CodecDecoder, MediaType, RawFrame, ReceiveStatus, SubmitStatus, SubtitleDecoder,
    SubtitleOverlay,
};
use crate::config::{ReorderPolicy, SAMPLE_QUEUE_SIZE, SUBPICTURE_QUEUE_SIZE, VIDEO_PICTURE_QUEUE_SIZE};
use crate::error::Result;

/// Consecutive refused submissions tolerated before the packet is dropped.
const BUSY_RETRY_LIMIT: u32 = 8;

/// Consecutive receive errors tolerated before asking for more input.
const RECEIVE_ERROR_LIMIT: u32 = 8;

/// The closed set of elementary stream kinds the player decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [StreamKind::Video, StreamKind::Audio, StreamKind::Subtitle];

    /// Decoded look-ahead kept for this kind.
    #[must_use]
    pub fn frame_queue_capacity(self) -> usize {
        match self {
            Self::Video => VIDEO_PICTURE_QUEUE_SIZE,
            Self::Audio => SAMPLE_QUEUE_SIZE,
            Self::Subtitle => SUBPICTURE_QUEUE_SIZE,
        }
    }

    /// Whether the last shown frame stays available for redraw.
    #[must_use]
    pub fn keep_last(self) -> bool {
        !matches!(self, Self::Subtitle)
    }

    #[must_use]
    pub fn thread_name(self) -> &'static str {
        match self {
            Self::Video => "video-decoder",
            Self::Audio => "audio-decoder",
            Self::Subtitle => "subtitle-decoder",
        }
    }

    #[must_use]
    pub fn media_type(self) -> MediaType {
        match self {
            Self::Video => MediaType::Video,
            Self::Audio => MediaType::Audio,
            Self::Subtitle => MediaType::Subtitle,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Subtitle => "subtitle",
        };
        f.write_str(name)
    }
}

/// End-of-stream bookkeeping shared with the reader.
#[derive(Debug, Default)]
pub struct DecoderStatus {
    /// Epoch for which the decoder has been fully drained, 0 while running.
    finished: AtomicI64,
}

impl DecoderStatus {
    #[must_use]
    pub fn finished(&self) -> i64 {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) fn set_finished(&self, serial: i64) {
        self.finished.store(serial, Ordering::Release);
    }
}

enum Codec<P, T> {
    Frames(Box<dyn CodecDecoder<P, T>>),
    Subtitles(Box<dyn SubtitleDecoder<P, T>>),
}

impl<P, T> Codec<P, T> {
    fn flush(&mut self) {
        match self {
            Self::Frames(decoder) => decoder.flush(),
            Self::Subtitles(decoder) => decoder.flush(),
        }
    }
}

enum Drain<T> {
    Frame(RawFrame<T>),
    NeedInput,
    Aborted,
}

/// Per-stream decode state machine.
pub struct DecoderHarness<P, T> {
    kind: StreamKind,
    codec: Codec<P, T>,
    queue: Arc<PacketQueue<P>>,
    waker: Arc<ReadWaker>,
    status: Arc<DecoderStatus>,
    time_base: TimeBase,
    reorder: ReorderPolicy,
    /// A packet the codec refused, re-submitted after the next drain.
    pending: Option<CompressedUnit<P>>,
    busy_retries: u32,
    pkt_serial: i64,
    start_pts: Option<i64>,
    start_pts_tb: TimeBase,
    next_pts: Option<i64>,
    next_pts_tb: TimeBase,
}

impl<P, T> DecoderHarness<P, T> {
    /// Creates a harness for an audio or video codec.
    pub fn new(
        kind: StreamKind,
        decoder: Box<dyn CodecDecoder<P, T>>,
        stage: &DecoderStage<P, impl Sized>,
        waker: Arc<ReadWaker>,
        time_base: TimeBase,
    ) -> Self {
        Self::with_codec(kind, Codec::Frames(decoder), stage, waker, time_base)
    }

    /// Creates a harness for a subtitle codec.
    pub fn subtitles(
        decoder: Box<dyn SubtitleDecoder<P, T>>,
        stage: &DecoderStage<P, impl Sized>,
        waker: Arc<ReadWaker>,
        time_base: TimeBase,
    ) -> Self {
        Self::with_codec(StreamKind::Subtitle, Codec::Subtitles(decoder), stage, waker, time_base)
    }

    fn with_codec(
        kind: StreamKind,
        codec: Codec<P, T>,
        stage: &DecoderStage<P, impl Sized>,
        waker: Arc<ReadWaker>,
        time_base: TimeBase,
    ) -> Self {
        Self {
            kind,
            codec,
            queue: Arc::clone(&stage.packets),
            waker,
            status: Arc::clone(&stage.status),
            time_base,
            reorder: ReorderPolicy::Auto,
            pending: None,
            busy_retries: 0,
            pkt_serial: -1,
            start_pts: None,
            start_pts_tb: time_base,
            next_pts: None,
            next_pts_tb: time_base,
        }
    }

    /// Selects which codec timestamp becomes the video pts.
    #[must_use]
    pub fn with_reorder(mut self, reorder: ReorderPolicy) -> Self {
        self.reorder = reorder;
        self
    }

    /// Seeds audio pts extrapolation for containers without seek support.
    #[must_use]
    pub fn with_start_pts(mut self, start_pts: Option<i64>, time_base: TimeBase) -> Self {
        self.start_pts = start_pts;
        self.start_pts_tb = time_base;
        self
    }

    #[must_use]
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    #[must_use]
    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    /// Epoch of the last packet taken from the queue.
    #[must_use]
    pub fn pkt_serial(&self) -> i64 {
        self.pkt_serial
    }

    /// Whether more packets are already waiting.
    #[must_use]
    pub fn has_queued_packets(&self) -> bool {
        self.queue.nb_packets() > 0
    }

    /// Produces the next decoded frame of the live epoch.
    ///
    /// Returns `None` once the packet queue is aborted.
    pub fn decode_frame(&mut self) -> Option<RawFrame<T>> {
        loop {
            if self.queue.serial() == self.pkt_serial {
                match self.drain() {
                    Drain::Frame(frame) => return Some(frame),
                    Drain::Aborted => return None,
                    Drain::NeedInput => {}
                }
            }

            let unit = self.acquire()?;

            match &mut self.codec {
                Codec::Subtitles(decoder) => {
                    let sentinel = unit.is_sentinel();
                    match decoder.decode(&unit) {
                        Ok(Some(frame)) => {
                            // Multi-part decoders may still hold output.
                            if sentinel {
                                self.pending = Some(unit);
                            }
                            return Some(frame);
                        }
                        Ok(None) => {
                            if sentinel {
                                self.status.set_finished(self.pkt_serial);
                                decoder.flush();
                            }
                        }
                        Err(e) => warn!("{} decode failed: {e}", self.kind),
                    }
                }
                Codec::Frames(decoder) => match decoder.submit(&unit) {
                    Ok(SubmitStatus::Accepted) => self.busy_retries = 0,
                    Ok(SubmitStatus::Busy) => {
                        error!(
                            "{} decoder refused input while reporting no output, which is an API violation",
                            self.kind
                        );
                        self.busy_retries += 1;
                        if self.busy_retries <= BUSY_RETRY_LIMIT {
                            self.pending = Some(unit);
                        } else {
                            self.busy_retries = 0;
                        }
                    }
                    Err(e) => warn!("{} packet rejected: {e}", self.kind),
                },
            }
        }
    }

    fn drain(&mut self) -> Drain<T> {
        let Codec::Frames(decoder) = &mut self.codec else {
            return Drain::NeedInput;
        };
        let mut errors = 0;
        loop {
            if self.queue.is_aborted() {
                return Drain::Aborted;
            }
            match decoder.receive() {
                Ok(ReceiveStatus::Frame(mut frame)) => {
                    match self.kind {
                        StreamKind::Video => self.normalize_video(&mut frame),
                        StreamKind::Audio => self.normalize_audio(&mut frame),
                        StreamKind::Subtitle => {}
                    }
                    return Drain::Frame(frame);
                }
                Ok(ReceiveStatus::Drained) => {
                    debug!("{} decoder drained for epoch {}", self.kind, self.pkt_serial);
                    self.status.set_finished(self.pkt_serial);
                    decoder.flush();
                    return Drain::NeedInput;
                }
                Ok(ReceiveStatus::Again) => return Drain::NeedInput,
                Err(e) => {
                    warn!("{} decode failed: {e}", self.kind);
                    errors += 1;
                    if errors >= RECEIVE_ERROR_LIMIT {
                        return Drain::NeedInput;
                    }
                }
            }
        }
    }

    /// Takes the next packet of the live epoch, handling flush markers.
    fn acquire(&mut self) -> Option<CompressedUnit<P>> {
        loop {
            if self.queue.nb_packets() == 0 {
                self.waker.notify();
            }

            let unit = if let Some(unit) = self.pending.take() {
                unit
            } else {
                match self.queue.get(true) {
                    Dequeued::Aborted => return None,
                    Dequeued::Empty => continue,
                    Dequeued::Packet { packet, serial } => {
                        if serial != self.pkt_serial {
                            self.reset(serial);
                        }
                        match packet {
                            QueuedPacket::Flush => {
                                self.reset(serial);
                                continue;
                            }
                            QueuedPacket::Unit(unit) => unit,
                        }
                    }
                }
            };

            if self.queue.serial() == self.pkt_serial {
                return Some(unit);
            }
        }
    }

    fn reset(&mut self, serial: i64) {
        self.codec.flush();
        self.pkt_serial = serial;
        self.status.set_finished(0);
        self.next_pts = self.start_pts;
        self.next_pts_tb = self.start_pts_tb;
        self.busy_retries = 0;
    }

    fn normalize_video(&self, frame: &mut RawFrame<T>) {
        frame.pts = match self.reorder {
            ReorderPolicy::Auto => frame.best_effort_timestamp,
            ReorderPolicy::Dts => frame.pkt_dts,
            ReorderPolicy::Pts => frame.pts,
        };
    }

    /// Rescales audio pts to 1/sample_rate and extrapolates missing ones.
    fn normalize_audio(&mut self, frame: &mut RawFrame<T>) {
        let Ok(rate) = i32::try_from(frame.sample_rate) else {
            return;
        };
        if rate == 0 {
            return;
        }
        let sample_tb = TimeBase::new(1, rate);
        frame.pts = match (frame.pts, self.next_pts) {
            (Some(pts), _) => Some(self.time_base.rescale(pts, sample_tb)),
            (None, Some(next)) => Some(self.next_pts_tb.rescale(next, sample_tb)),
            (None, None) => None,
        };
        if let Some(pts) = frame.pts {
            self.next_pts = Some(pts + frame.nb_samples as i64);
            self.next_pts_tb = sample_tb;
        }
    }
}

/// Queues, status and thread of one stream component.
pub struct DecoderStage<P, T> {
    kind: StreamKind,
    stream_index: Option<usize>,
    packets: Arc<PacketQueue<P>>,
    frames: Arc<FrameQueue<T>>,
    status: Arc<DecoderStatus>,
    thread: Option<JoinHandle<()>>,
}

impl<P: Send + 'static, T: Send + 'static> DecoderStage<P, T> {
    /// Creates idle queues for `kind`; the packet queue starts aborted.
    #[must_use]
    pub fn new(kind: StreamKind) -> Self {
        let packets = Arc::new(PacketQueue::new());
        let frames = Arc::new(FrameQueue::new(
            kind.frame_queue_capacity(),
            kind.keep_last(),
            packets.abort_handle(),
            packets.serial_handle(),
        ));
        Self {
            kind,
            stream_index: None,
            packets,
            frames,
            status: Arc::new(DecoderStatus::default()),
            thread: None,
        }
    }

    /// Starts the packet queue and runs `body` on the decoder thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(&mut self, stream_index: usize, body: impl FnOnce() + Send + 'static) -> Result<()> {
        self.packets.start();
        let handle = thread::Builder::new()
            .name(self.kind.thread_name().to_string())
            .spawn(body)?;
        self.thread = Some(handle);
        self.stream_index = Some(stream_index);
        Ok(())
    }

    /// Stops the decoder thread: abort, wake, join, then flush.
    pub fn abort(&mut self) {
        self.packets.abort();
        self.frames.signal();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("{} decoder thread panicked", self.kind);
            }
        }
        self.packets.flush();
        self.stream_index = None;
    }
}

impl<P, T> DecoderStage<P, T> {
    #[must_use]
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Index of the open stream, `None` while closed.
    #[must_use]
    pub fn stream_index(&self) -> Option<usize> {
        self.stream_index
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stream_index.is_some()
    }

    #[must_use]
    pub fn packets(&self) -> &Arc<PacketQueue<P>> {
        &self.packets
    }

    #[must_use]
    pub fn frames(&self) -> &Arc<FrameQueue<T>> {
        &self.frames
    }

    #[must_use]
    pub fn status(&self) -> &Arc<DecoderStatus> {
        &self.status
    }

    /// The stream has been drained at the live epoch and its frames consumed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.status.finished() == self.packets.serial() && self.frames.nb_remaining() == 0
    }
}

/// Video decoder thread body.
///
/// `drop_early` decides whether an already late frame is discarded before
/// it reaches the queue; it is only asked when more packets are waiting and
/// the frame has a known pts.
pub fn run_video<P, V>(
    mut harness: DecoderHarness<P, V>,
    frames: Arc<FrameQueue<V>>,
    frame_rate: Option<f64>,
    mut drop_early: impl FnMut(&FrameInfo) -> bool,
) {
    let time_base = harness.time_base();
    let duration = frame_rate.filter(|r| *r > 0.0).map_or(0.0, |r| 1.0 / r);
    while let Some(raw) = harness.decode_frame() {
        let info = FrameInfo {
            pts: raw.pts.map_or(f64::NAN, |pts| time_base.to_secs(pts)),
            duration,
            pos: raw.pos,
            serial: harness.pkt_serial(),
        };
        if !info.pts.is_nan() && harness.has_queued_packets() && drop_early(&info) {
            continue;
        }
        let Some(slot) = frames.peek_writable() else {
            break;
        };
        slot.push(Frame::new(info, raw.payload));
    }
    debug!("video decoder stopped");
}

/// Audio decoder thread body.
pub fn run_audio<P, A>(mut harness: DecoderHarness<P, A>, frames: Arc<FrameQueue<AudioBlock<A>>>) {
    while let Some(raw) = harness.decode_frame() {
        let rate = f64::from(raw.sample_rate);
        let info = FrameInfo {
            pts: match raw.pts {
                Some(pts) if rate > 0.0 => pts as f64 / rate,
                _ => f64::NAN,
            },
            duration: if rate > 0.0 { raw.nb_samples as f64 / rate } else { 0.0 },
            pos: raw.pos,
            serial: harness.pkt_serial(),
        };
        let block = AudioBlock {
            samples: raw.payload,
            nb_samples: raw.nb_samples,
            sample_rate: raw.sample_rate,
        };
        let Some(slot) = frames.peek_writable() else {
            break;
        };
        slot.push(Frame::new(info, block));
    }
    debug!("audio decoder stopped");
}

/// Subtitle decoder thread body. Only bitmap subtitles are queued.
pub fn run_subtitles<P>(
    mut harness: DecoderHarness<P, SubtitleOverlay>,
    frames: Arc<FrameQueue<SubtitleOverlay>>,
) {
    while let Some(raw) = harness.decode_frame() {
        if !raw.payload.bitmap {
            continue;
        }
        let info = FrameInfo {
            pts: raw.pts.map_or(f64::NAN, |us| us as f64 / MICROS_PER_SECOND),
            duration: 0.0,
            pos: raw.pos,
            serial: harness.pkt_serial(),
        };
        let Some(slot) = frames.peek_writable() else {
            break;
        };
        slot.push(Frame::new(info, raw.payload));
    }
    debug!("subtitle decoder stopped");
}
