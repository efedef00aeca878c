// SPDX-License-Identifier: MPL-2.0
//! End-to-end playback through an in-memory backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use lens_player::application::port::{
    AudioCallback, AudioDevice, AudioSpec, CodecDecoder, CodecFactory, Demuxer, ImageConverter,
    MediaBackend, MediaInfo, MediaType, PixelBuffer, RawFrame, ReadOutcome, ReceiveStatus,
    Renderer, Resampler, SeekRequest, StreamInfo, SubmitStatus, SubtitleDecoder, SubtitleOverlay,
};
use lens_player::config::SessionConfig;
use lens_player::error::{AudioError, Error, Result};
use lens_player::player::event;
use lens_player::player::packet_queue::{Dequeued, QueuedPacket};
use lens_player::player::sync::{compute_target_delay, external_clock_speed, QueueLevels};
use lens_player::player::time_units::TimeBase;
use lens_player::player::{
    AbortHandle, CompressedUnit, PacketQueue, Presenter, Session, StreamKind, TerminationReason,
};
use parking_lot::Mutex;

const VIDEO: usize = 0;
const AUDIO: usize = 1;

/// Interleaved clip: `count` video frames at 100 fps and one 10 ms audio block per frame.
fn clip_units(count: i64) -> Vec<(usize, i64)> {
    (0..count).flat_map(|i| [(VIDEO, i), (AUDIO, i * 480)]).collect()
}

fn clip_info(count: i64) -> MediaInfo {
    let mut video = StreamInfo::new(VIDEO, MediaType::Video, TimeBase::new(1, 100));
    video.frame_rate = Some(100.0);
    video.codec_name = "raw".to_string();
    let mut audio = StreamInfo::new(AUDIO, MediaType::Audio, TimeBase::new(1, 48_000));
    audio.sample_rate = 48_000;
    audio.channels = 2;
    audio.codec_name = "pcm".to_string();
    MediaInfo {
        url: "memory:clip".to_string(),
        format_name: "memory".to_string(),
        start_time: Some(0),
        duration: Some(count * 10_000),
        bit_rate: 64_000,
        size_bytes: Some(count * 128),
        streams: vec![video, audio],
        ..MediaInfo::default()
    }
}

struct MemoryDemuxer {
    info: MediaInfo,
    units: Arc<Vec<(usize, i64)>>,
    cursor: usize,
    seeks: Arc<Mutex<Vec<SeekRequest>>>,
}

impl MemoryDemuxer {
    fn micros(&self, (stream, pts): (usize, i64)) -> f64 {
        self.info.streams[stream].time_base.to_secs(pts) * 1_000_000.0
    }
}

impl Demuxer for MemoryDemuxer {
    type Packet = u32;

    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn read_unit(&mut self) -> ReadOutcome<u32> {
        let Some(&(stream, pts)) = self.units.get(self.cursor) else {
            return ReadOutcome::EndOfStream;
        };
        let position = self.cursor as i64 * 64;
        self.cursor += 1;
        let duration = if stream == VIDEO { 1 } else { 480 };
        ReadOutcome::Unit(
            CompressedUnit::new(stream, u32::try_from(pts).unwrap_or(0), 64)
                .with_pts(Some(pts))
                .with_dts(Some(pts))
                .with_duration(duration)
                .with_pos(Some(position)),
        )
    }

    fn seek(&mut self, request: &SeekRequest) -> Result<()> {
        self.seeks.lock().push(*request);
        let target = request.target as f64;
        self.cursor = (0..self.units.len())
            .find(|&i| self.micros(self.units[i]) >= target)
            .unwrap_or(self.units.len());
        Ok(())
    }
}

/// Emits one frame per submitted unit.
#[derive(Default)]
struct EchoDecoder {
    output: VecDeque<RawFrame<i64>>,
    draining: bool,
    nb_samples: usize,
    sample_rate: u32,
}

impl EchoDecoder {
    fn audio() -> Self {
        Self {
            nb_samples: 480,
            sample_rate: 48_000,
            ..Self::default()
        }
    }
}

impl CodecDecoder<u32, i64> for EchoDecoder {
    fn submit(&mut self, unit: &CompressedUnit<u32>) -> Result<SubmitStatus> {
        if unit.is_sentinel() {
            self.draining = true;
            return Ok(SubmitStatus::Accepted);
        }
        let mut frame = RawFrame::new(unit.pts.unwrap_or(-1));
        frame.pts = unit.pts;
        frame.best_effort_timestamp = unit.pts;
        frame.pkt_dts = unit.dts;
        frame.pos = unit.pos;
        frame.nb_samples = self.nb_samples;
        frame.sample_rate = self.sample_rate;
        self.output.push_back(frame);
        Ok(SubmitStatus::Accepted)
    }

    fn receive(&mut self) -> Result<ReceiveStatus<i64>> {
        if let Some(frame) = self.output.pop_front() {
            return Ok(ReceiveStatus::Frame(frame));
        }
        if self.draining {
            return Ok(ReceiveStatus::Drained);
        }
        Ok(ReceiveStatus::Again)
    }

    fn flush(&mut self) {
        self.output.clear();
        self.draining = false;
    }
}

struct NoSubtitles;

impl SubtitleDecoder<u32> for NoSubtitles {
    fn decode(&mut self, _unit: &CompressedUnit<u32>) -> Result<Option<RawFrame<SubtitleOverlay>>> {
        Ok(None)
    }

    fn flush(&mut self) {}
}

/// Produces a constant-level signal of the requested length.
struct ConstantResampler;

impl Resampler<i64> for ConstantResampler {
    fn convert(&mut self, _block: &i64, wanted_nb_samples: usize, target: &AudioSpec) -> Result<Vec<f32>> {
        Ok(vec![0.25; wanted_nb_samples * usize::from(target.channels)])
    }
}

struct GrayConverter;

impl ImageConverter<i64> for GrayConverter {
    fn convert(&mut self, _picture: &i64) -> Result<PixelBuffer> {
        Ok(PixelBuffer {
            width: 2,
            height: 2,
            sample_aspect_ratio: 1.0,
            rgba: vec![128; 16],
        })
    }
}

struct MemoryCodecs;

impl CodecFactory for MemoryCodecs {
    type Packet = u32;
    type Picture = i64;
    type Samples = i64;

    fn video_decoder(&self, _stream: &StreamInfo) -> Result<Box<dyn CodecDecoder<u32, i64>>> {
        Ok(Box::new(EchoDecoder::default()))
    }

    fn audio_decoder(&self, _stream: &StreamInfo) -> Result<Box<dyn CodecDecoder<u32, i64>>> {
        Ok(Box::new(EchoDecoder::audio()))
    }

    fn subtitle_decoder(&self, _stream: &StreamInfo) -> Result<Box<dyn SubtitleDecoder<u32>>> {
        Ok(Box::new(NoSubtitles))
    }

    fn resampler(&self) -> Box<dyn Resampler<i64>> {
        Box::new(ConstantResampler)
    }

    fn image_converter(&self) -> Box<dyn ImageConverter<i64>> {
        Box::new(GrayConverter)
    }
}

#[derive(Clone)]
struct MemoryBackend {
    info: MediaInfo,
    units: Arc<Vec<(usize, i64)>>,
    seeks: Arc<Mutex<Vec<SeekRequest>>>,
}

impl MemoryBackend {
    fn new(frames: i64) -> Self {
        Self {
            info: clip_info(frames),
            units: Arc::new(clip_units(frames)),
            seeks: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MediaBackend for MemoryBackend {
    type Packet = u32;
    type Picture = i64;
    type Samples = i64;
    type Demuxer = MemoryDemuxer;
    type Codecs = MemoryCodecs;

    fn open(&self, _source: &str, _interrupt: AbortHandle) -> Result<(MemoryDemuxer, MemoryCodecs)> {
        let demuxer = MemoryDemuxer {
            info: self.info.clone(),
            units: Arc::clone(&self.units),
            cursor: 0,
            seeks: Arc::clone(&self.seeks),
        };
        Ok((demuxer, MemoryCodecs))
    }
}

/// Counts presented pictures.
struct CountingRenderer {
    presented: Arc<AtomicU64>,
}

impl Renderer for CountingRenderer {
    fn upload_image(&mut self, _image: &PixelBuffer) -> Result<()> {
        Ok(())
    }

    fn upload_overlay(&mut self, _overlay: &SubtitleOverlay) -> Result<()> {
        Ok(())
    }

    fn clear_overlay(&mut self) {}

    fn present(&mut self) -> Result<()> {
        self.presented.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Device that keeps the pull callback so the test can drive it.
struct ManualDevice {
    callback: Arc<Mutex<Option<AudioCallback>>>,
}

impl AudioDevice for ManualDevice {
    fn try_open(&mut self, wanted: &AudioSpec) -> std::result::Result<AudioSpec, AudioError> {
        Ok(*wanted)
    }

    fn start(&mut self, callback: AudioCallback) -> std::result::Result<(), AudioError> {
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    fn close(&mut self) {
        self.callback.lock().take();
    }
}

fn video_only_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.streams.audio_disable = true;
    config.streams.subtitle_disable = true;
    config.playback.autoexit = true;
    config
}

/// Plays `backend` to completion on a presentation thread.
fn play(backend: MemoryBackend, config: SessionConfig) -> (TerminationReason, u64) {
    let presented = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&presented);
    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        let (events, receiver) = event::channel();
        let renderer = Box::new(CountingRenderer { presented: counter });
        let session = Session::open(&backend, "memory:clip", config, renderer, None, events)
            .expect("session opens");
        let _ = done_tx.send(Presenter::new(session, receiver).run());
    });
    let reason = done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("playback finishes");
    (reason, presented.load(Ordering::Relaxed))
}

#[test]
fn started_queue_delivers_flush_first() {
    let queue: PacketQueue<u32> = PacketQueue::new();
    queue.start();
    match queue.get(true) {
        Dequeued::Packet {
            packet: QueuedPacket::Flush,
            serial,
        } => assert_eq!(serial, 1),
        other => panic!("expected the start flush, got {other:?}"),
    }
}

#[test]
fn flush_then_marker_discards_previous_epoch() {
    let queue: PacketQueue<u32> = PacketQueue::new();
    queue.start();
    let _ = queue.get(true);
    queue.put(CompressedUnit::new(VIDEO, 1, 100));
    queue.put(CompressedUnit::new(VIDEO, 2, 100));
    queue.flush();
    queue.put_flush();
    queue.put(CompressedUnit::new(VIDEO, 3, 100));

    assert_eq!(queue.nb_packets(), 2);
    assert!(matches!(
        queue.get(false),
        Dequeued::Packet { packet: QueuedPacket::Flush, serial: 2 }
    ));
    match queue.get(false) {
        Dequeued::Packet {
            packet: QueuedPacket::Unit(unit),
            serial,
        } => {
            assert_eq!(unit.payload, Some(3));
            assert_eq!(serial, 2);
        }
        other => panic!("expected unit 3, got {other:?}"),
    }
}

#[test]
fn video_far_behind_shows_immediately() {
    assert_eq!(compute_target_delay(0.04, Some(-0.2), 3600.0), 0.0);
}

#[test]
fn starved_external_clock_slows_down() {
    let levels = QueueLevels {
        video: Some(1),
        audio: None,
    };
    let speed = external_clock_speed(1.0, levels).expect("speed changes");
    assert!((speed - 0.999).abs() < 1e-9);
}

#[test]
fn video_only_clip_plays_to_the_end() {
    let (reason, presented) = play(MemoryBackend::new(25), video_only_config());
    assert_eq!(reason, TerminationReason::EndOfPlayback);
    assert!(presented >= 1);
}

#[test]
fn looping_seeks_back_to_the_start_once() {
    let backend = MemoryBackend::new(10);
    let seeks = Arc::clone(&backend.seeks);
    let mut config = video_only_config();
    config.playback.loop_count = 2;

    let (reason, _) = play(backend, config);
    assert_eq!(reason, TerminationReason::EndOfPlayback);
    let seeks = seeks.lock();
    assert_eq!(seeks.len(), 1);
    assert_eq!(seeks[0].target, 0);
    assert!(!seeks[0].by_bytes);
}

#[test]
fn relative_seek_reaches_the_demuxer_with_a_forward_window() {
    let backend = MemoryBackend::new(1000);
    let seeks = Arc::clone(&backend.seeks);
    let (events, _receiver) = event::channel();
    let renderer = Box::new(CountingRenderer {
        presented: Arc::new(AtomicU64::new(0)),
    });
    let mut session = Session::open(&backend, "memory:clip", video_only_config(), renderer, None, events)
        .expect("session opens");

    session.seek_relative(5.0);

    let deadline = Instant::now() + Duration::from_secs(5);
    while seeks.lock().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    session.close();

    let seeks = seeks.lock();
    let request = seeks.first().expect("seek reached the demuxer");
    assert!(!request.by_bytes);
    assert_eq!(request.min, request.target - 5_000_000 + 2);
    assert_eq!(request.max, i64::MAX);
}

#[test]
fn start_time_seek_accepts_keyframes_on_either_side() {
    let backend = MemoryBackend::new(500);
    let seeks = Arc::clone(&backend.seeks);
    let mut config = video_only_config();
    config.playback.start_time = Some(2.0);
    let (events, _receiver) = event::channel();
    let renderer = Box::new(CountingRenderer {
        presented: Arc::new(AtomicU64::new(0)),
    });
    let mut session = Session::open(&backend, "memory:clip", config, renderer, None, events)
        .expect("session opens");
    session.close();

    let seeks = seeks.lock();
    let request = seeks.first().expect("initial seek");
    assert_eq!(request.target, 2_000_000);
    assert_eq!(request.min, i64::MIN);
    assert_eq!(request.max, i64::MAX);
}

#[test]
fn audio_callback_drives_the_audio_clock() {
    let backend = MemoryBackend::new(200);
    let callback = Arc::new(Mutex::new(None));
    let device = Box::new(ManualDevice {
        callback: Arc::clone(&callback),
    });
    let mut config = SessionConfig::default();
    config.streams.subtitle_disable = true;
    config.audio.volume = 100;
    let (events, _receiver) = event::channel();
    let renderer = Box::new(CountingRenderer {
        presented: Arc::new(AtomicU64::new(0)),
    });
    let mut session = Session::open(&backend, "memory:clip", config, renderer, Some(device), events)
        .expect("session opens");
    assert_eq!(session.stream_index(StreamKind::Audio), Some(AUDIO));

    let mut out = vec![0.0_f32; 1024];
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(fill) = callback.lock().as_mut() {
            fill(&mut out);
        }
        if out.iter().any(|&s| s != 0.0) && !session.clocks().audio.get().is_nan() {
            break;
        }
        assert!(Instant::now() < deadline, "audio never started");
        thread::sleep(Duration::from_millis(5));
    }

    session.toggle_mute();
    if let Some(fill) = callback.lock().as_mut() {
        fill(&mut out);
    }
    assert!(out.iter().all(|&s| s == 0.0));

    session.close();
    assert!(callback.lock().is_none());
}

#[test]
fn sources_without_audio_or_video_fail_to_open() {
    let mut backend = MemoryBackend::new(1);
    backend.info.streams = vec![StreamInfo::new(0, MediaType::Subtitle, TimeBase::new(1, 1000))];
    let (events, _receiver) = event::channel();
    let renderer = Box::new(CountingRenderer {
        presented: Arc::new(AtomicU64::new(0)),
    });
    let opened = Session::open(&backend, "memory:subs", SessionConfig::default(), renderer, None, events);
    assert!(matches!(opened, Err(Error::Open(_))));
}
