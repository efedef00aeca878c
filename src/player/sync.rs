// SPDX-License-Identifier: MPL-2.0
//! Audio/video synchronization and video refresh scheduling.
//!
//! Three [`Clock`]s run side by side: audio (driven by the output
//! callback), video (driven by displayed frames) and external (free
//! running, nudged toward whichever stream drives it). One of them is the
//! master; the others are corrected toward it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  set   ┌─────────────┐
//! │ Audio output │───────▶│ audio clock │──┐
//! └──────────────┘        └─────────────┘  │ master
//!                                          ▼
//! ┌──────────────┐  peek  ┌───────────────┐  delay   ┌──────────┐
//! │ Picture ring │───────▶│ SyncScheduler │─────────▶│ Renderer │
//! └──────────────┘        └───────────────┘          └──────────┘
//!                                 │ set
//!                                 ▼
//!                          ┌─────────────┐
//!                          │ video clock │
//!                          └─────────────┘
//! ```
//!
//! The scheduler never sleeps itself: each [`SyncScheduler::refresh`]
//! lowers the caller's remaining wait time and returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use super::clock::Clock;
use super::controls::PlaybackControls;
use super::frame_queue::{FrameInfo, FrameQueue};
use super::serial::Serial;
use super::time_units::wall_time;
use crate::application::port::{ImageConverter, Renderer, SubtitleOverlay};
use crate::config::{
    FrameDropMode, SyncMode, AV_SYNC_FRAMEDUP_THRESHOLD, AV_SYNC_THRESHOLD_MAX,
    AV_SYNC_THRESHOLD_MIN, EXTERNAL_CLOCK_MAX_FRAMES, EXTERNAL_CLOCK_MIN_FRAMES,
    EXTERNAL_CLOCK_SPEED_MAX, EXTERNAL_CLOCK_SPEED_MIN, EXTERNAL_CLOCK_SPEED_STEP,
};

/// The three playback clocks and the master selection policy.
#[derive(Debug)]
pub struct Clocks {
    pub audio: Clock,
    pub video: Clock,
    pub external: Clock,
    sync_mode: SyncMode,
    has_audio: AtomicBool,
    has_video: AtomicBool,
}

impl Clocks {
    /// Creates clocks following the epochs of the audio and video packet queues.
    #[must_use]
    pub fn new(sync_mode: SyncMode, audio_serial: Serial, video_serial: Serial) -> Self {
        Self {
            audio: Clock::new(audio_serial),
            video: Clock::new(video_serial),
            external: Clock::free_running(),
            sync_mode,
            has_audio: AtomicBool::new(false),
            has_video: AtomicBool::new(false),
        }
    }

    /// Requested sync mode, before fallback.
    #[must_use]
    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    pub fn set_has_audio(&self, present: bool) {
        self.has_audio.store(present, Ordering::Release);
    }

    pub fn set_has_video(&self, present: bool) {
        self.has_video.store(present, Ordering::Release);
    }

    #[must_use]
    pub fn has_audio(&self) -> bool {
        self.has_audio.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn has_video(&self) -> bool {
        self.has_video.load(Ordering::Acquire)
    }

    /// Effective master: the requested one if its stream exists, else a fallback.
    #[must_use]
    pub fn master_sync_type(&self) -> SyncMode {
        match self.sync_mode {
            SyncMode::Video if self.has_video() => SyncMode::Video,
            SyncMode::Video | SyncMode::Audio if self.has_audio() => SyncMode::Audio,
            _ => SyncMode::External,
        }
    }

    #[must_use]
    pub fn master(&self) -> &Clock {
        match self.master_sync_type() {
            SyncMode::Video => &self.video,
            SyncMode::Audio => &self.audio,
            SyncMode::External => &self.external,
        }
    }

    /// Current master clock value in seconds, NaN when unknown.
    #[must_use]
    pub fn master_value(&self) -> f64 {
        self.master().get()
    }

    /// Freezes or releases every clock.
    pub fn set_paused(&self, paused: bool) {
        self.audio.set_paused(paused);
        self.video.set_paused(paused);
        self.external.set_paused(paused);
    }

    /// Nudges the external clock speed from buffer levels (realtime sources).
    pub fn adjust_external_speed(&self, levels: QueueLevels) {
        if let Some(speed) = external_clock_speed(self.external.speed(), levels) {
            self.external.set_speed(speed);
        }
    }
}

/// Buffered packet counts of the open audio/video streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueLevels {
    pub video: Option<usize>,
    pub audio: Option<usize>,
}

/// New external clock speed for the given buffer levels, if it changes.
///
/// Starved buffers slow the clock toward the floor, full ones speed it up
/// toward the ceiling, anything in between relaxes it back to 1.0.
#[must_use]
pub fn external_clock_speed(speed: f64, levels: QueueLevels) -> Option<f64> {
    let starved = |level: Option<usize>| level.is_some_and(|n| n <= EXTERNAL_CLOCK_MIN_FRAMES);
    let full = |level: Option<usize>| level.is_none_or(|n| n > EXTERNAL_CLOCK_MAX_FRAMES);

    if starved(levels.video) || starved(levels.audio) {
        Some(EXTERNAL_CLOCK_SPEED_MIN.max(speed - EXTERNAL_CLOCK_SPEED_STEP))
    } else if full(levels.video) && full(levels.audio) {
        Some(EXTERNAL_CLOCK_SPEED_MAX.min(speed + EXTERNAL_CLOCK_SPEED_STEP))
    } else if speed != 1.0 {
        let offset = 1.0 - speed;
        Some(speed + EXTERNAL_CLOCK_SPEED_STEP * offset / offset.abs())
    } else {
        None
    }
}

/// Time `current` stays on screen before `next` replaces it.
///
/// Falls back to the frame's own estimate when the pts delta is unusable.
#[must_use]
pub fn vp_duration(current: &FrameInfo, next: &FrameInfo, max_frame_duration: f64) -> f64 {
    if current.serial != next.serial {
        return 0.0;
    }
    let duration = next.pts - current.pts;
    if duration.is_nan() || duration <= 0.0 || duration > max_frame_duration {
        current.duration
    } else {
        duration
    }
}

/// Adjusts the nominal frame `delay` by the video/master difference.
///
/// `diff` is `video_clock - master_clock`; `None` when video is the master.
/// Video behind the master shortens the delay (never below zero); video
/// ahead lengthens it, either by the difference for long frames or by
/// doubling short ones so catch-up happens by repetition.
#[must_use]
pub fn compute_target_delay(delay: f64, diff: Option<f64>, max_frame_duration: f64) -> f64 {
    let Some(diff) = diff else {
        return delay;
    };
    let sync_threshold = AV_SYNC_THRESHOLD_MIN.max(AV_SYNC_THRESHOLD_MAX.min(delay));
    if diff.is_nan() || diff.abs() >= max_frame_duration {
        return delay;
    }
    if diff <= -sync_threshold {
        (delay + diff).max(0.0)
    } else if diff >= sync_threshold && delay > AV_SYNC_FRAMEDUP_THRESHOLD {
        delay + diff
    } else if diff >= sync_threshold {
        2.0 * delay
    } else {
        delay
    }
}

/// Per-tick video refresh state.
pub struct SyncScheduler<V> {
    pictures: Arc<FrameQueue<V>>,
    subtitles: Arc<FrameQueue<SubtitleOverlay>>,
    clocks: Arc<Clocks>,
    controls: Arc<PlaybackControls>,
    converter: Box<dyn ImageConverter<V>>,
    renderer: Box<dyn Renderer>,
    framedrop: FrameDropMode,
    max_frame_duration: f64,
    realtime: bool,
    subtitles_open: bool,
    frame_timer: f64,
    force_refresh: bool,
    step: bool,
    frame_drops_late: u64,
}

impl<V> SyncScheduler<V> {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        pictures: Arc<FrameQueue<V>>,
        subtitles: Arc<FrameQueue<SubtitleOverlay>>,
        clocks: Arc<Clocks>,
        controls: Arc<PlaybackControls>,
        converter: Box<dyn ImageConverter<V>>,
        renderer: Box<dyn Renderer>,
        framedrop: FrameDropMode,
        max_frame_duration: f64,
    ) -> Self {
        Self {
            pictures,
            subtitles,
            clocks,
            controls,
            converter,
            renderer,
            framedrop,
            max_frame_duration,
            realtime: false,
            subtitles_open: false,
            frame_timer: 0.0,
            force_refresh: false,
            step: false,
            frame_drops_late: 0,
        }
    }

    /// Enables external clock speed nudging for live sources.
    #[must_use]
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn set_subtitles_open(&mut self, open: bool) {
        self.subtitles_open = open;
        if !open {
            self.renderer.clear_overlay();
        }
    }

    pub fn set_framedrop(&mut self, framedrop: FrameDropMode) {
        self.framedrop = framedrop;
    }

    pub fn set_max_frame_duration(&mut self, max_frame_duration: f64) {
        self.max_frame_duration = max_frame_duration;
    }

    #[must_use]
    pub fn frame_drops_late(&self) -> u64 {
        self.frame_drops_late
    }

    #[must_use]
    pub fn frame_timer(&self) -> f64 {
        self.frame_timer
    }

    #[must_use]
    pub fn is_stepping(&self) -> bool {
        self.step
    }

    /// Redraws the last frame on the next tick.
    pub fn force_refresh(&mut self) {
        self.force_refresh = true;
    }

    pub fn renderer_mut(&mut self) -> &mut dyn Renderer {
        self.renderer.as_mut()
    }

    /// Pauses or resumes every clock, compensating the frame timer for the pause.
    pub fn toggle_pause(&mut self) {
        self.stream_toggle_pause();
        self.step = false;
    }

    fn stream_toggle_pause(&mut self) {
        let clocks = &self.clocks;
        let paused = self.controls.is_paused();
        if paused {
            self.frame_timer += wall_time() - clocks.video.last_updated();
            clocks.video.set_paused(false);
            clocks.video.set(clocks.video.get(), clocks.video.serial());
        }
        clocks.external.set(clocks.external.get(), clocks.external.serial());
        clocks.set_paused(!paused);
        self.controls.set_paused(!paused);
    }

    /// Shows exactly one more frame, then pauses again.
    pub fn step_to_next_frame(&mut self) {
        if self.controls.is_paused() {
            self.stream_toggle_pause();
        }
        self.step = true;
    }

    fn late_drop_allowed(&self) -> bool {
        match self.framedrop {
            FrameDropMode::Always => true,
            FrameDropMode::Auto => self.clocks.master_sync_type() != SyncMode::Video,
            FrameDropMode::Never => false,
        }
    }

    fn video_diff(&self) -> Option<f64> {
        if self.clocks.master_sync_type() == SyncMode::Video {
            return None;
        }
        Some(self.clocks.video.get() - self.clocks.master_value())
    }

    /// Runs one refresh tick, lowering `remaining_time` to the next deadline.
    pub fn refresh(&mut self, remaining_time: &mut f64, levels: QueueLevels) {
        self.refresh_at(wall_time(), remaining_time, levels);
    }

    /// [`refresh`](Self::refresh) at an explicit wall time.
    pub fn refresh_at(&mut self, time: f64, remaining_time: &mut f64, levels: QueueLevels) {
        if self.controls.take_step_request() {
            self.step_to_next_frame();
        }

        let paused = self.controls.is_paused();
        if !paused && self.clocks.master_sync_type() == SyncMode::External && self.realtime {
            self.clocks.adjust_external_speed(levels);
        }

        if self.clocks.has_video() {
            self.advance_pictures(time, remaining_time, paused);
            if self.force_refresh && self.pictures.has_shown() {
                self.display();
            }
        }
        self.force_refresh = false;
    }

    fn advance_pictures(&mut self, time: f64, remaining_time: &mut f64, paused: bool) {
        loop {
            if self.pictures.nb_remaining() == 0 {
                return;
            }
            let (Some(last), Some(current)) = (self.pictures.peek_last(), self.pictures.peek_current())
            else {
                return;
            };

            if current.serial != self.pictures.serial() {
                self.pictures.advance();
                continue;
            }

            if last.serial != current.serial {
                self.frame_timer = time;
            }

            if paused {
                return;
            }

            let last_duration = vp_duration(&last, &current, self.max_frame_duration);
            let delay = compute_target_delay(last_duration, self.video_diff(), self.max_frame_duration);

            if time < self.frame_timer + delay {
                *remaining_time = remaining_time.min(self.frame_timer + delay - time);
                return;
            }

            self.frame_timer += delay;
            if delay > 0.0 && time - self.frame_timer > AV_SYNC_THRESHOLD_MAX {
                self.frame_timer = time;
            }

            if !current.pts.is_nan() {
                self.clocks.video.set(current.pts, current.serial);
                self.clocks.external.sync_to_slave(&self.clocks.video);
            }

            if self.pictures.nb_remaining() > 1 {
                if let Some(next) = self.pictures.peek_next() {
                    let duration = vp_duration(&current, &next, self.max_frame_duration);
                    if !self.step && self.late_drop_allowed() && time > self.frame_timer + duration {
                        self.frame_drops_late += 1;
                        debug!("late frame dropped at pts {:.3}", current.pts);
                        self.pictures.advance();
                        continue;
                    }
                }
            }

            if self.subtitles_open {
                self.retire_subtitles();
            }

            self.pictures.advance();
            self.force_refresh = true;

            if self.step && !self.controls.is_paused() {
                self.stream_toggle_pause();
            }
            return;
        }
    }

    /// Drops subtitles whose window has elapsed or whose successor has started.
    fn retire_subtitles(&mut self) {
        let video_pts = self.clocks.video.pts();
        let live_serial = self.subtitles.serial();
        while self.subtitles.nb_remaining() > 0 {
            let Some((info, end_display, uploaded)) = self
                .subtitles
                .with_current(|f| (f.info, f.payload.end_display, f.uploaded))
            else {
                return;
            };
            let successor_started = self.subtitles.nb_remaining() > 1
                && self
                    .subtitles
                    .with_next(|f| video_pts > f.info.pts + f.payload.start_display)
                    .unwrap_or(false);

            if info.serial != live_serial || video_pts > info.pts + end_display || successor_started {
                if uploaded {
                    self.renderer.clear_overlay();
                }
                self.subtitles.advance();
            } else {
                return;
            }
        }
    }

    /// Uploads the last shown picture (and due subtitle) and presents.
    fn display(&mut self) {
        let Some(picture) = self.pictures.peek_last() else {
            return;
        };

        if self.subtitles_open && self.subtitles.nb_remaining() > 0 {
            let renderer = &mut self.renderer;
            self.subtitles.with_current(|sub| {
                if picture.pts >= sub.info.pts + sub.payload.start_display && !sub.uploaded {
                    if let Err(e) = renderer.upload_overlay(&sub.payload) {
                        warn!("subtitle upload failed: {e}");
                    }
                    sub.uploaded = true;
                }
            });
        }

        let converter = &mut self.converter;
        let renderer = &mut self.renderer;
        self.pictures.with_last(|frame| {
            if frame.uploaded {
                return;
            }
            match converter.convert(&frame.payload) {
                Ok(image) => {
                    if let Err(e) = renderer.upload_image(&image) {
                        warn!("picture upload failed: {e}");
                    }
                }
                Err(e) => warn!("picture conversion failed: {e}"),
            }
            frame.uploaded = true;
        });

        if let Err(e) = self.renderer.present() {
            warn!("present failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::port::PixelBuffer;
    use crate::config::{AV_NOSYNC_THRESHOLD, MAX_FRAME_DURATION};
    use crate::error::Result;
    use crate::player::frame_queue::Frame;
    use crate::player::packet_queue::PacketQueue;
    use crate::test_utils::{assert_abs_diff_eq, TIMESTAMP_EPSILON};
    use parking_lot::Mutex;

    fn info(pts: f64, serial: i64) -> FrameInfo {
        FrameInfo {
            pts,
            duration: 0.04,
            pos: None,
            serial,
        }
    }

    #[test]
    fn master_falls_back_when_stream_missing() {
        let clocks = Clocks::new(SyncMode::Video, Serial::new(0), Serial::new(0));
        assert_eq!(clocks.master_sync_type(), SyncMode::External);
        clocks.set_has_audio(true);
        assert_eq!(clocks.master_sync_type(), SyncMode::Audio);
        clocks.set_has_video(true);
        assert_eq!(clocks.master_sync_type(), SyncMode::Video);

        let clocks = Clocks::new(SyncMode::Audio, Serial::new(0), Serial::new(0));
        clocks.set_has_video(true);
        assert_eq!(clocks.master_sync_type(), SyncMode::External);

        let clocks = Clocks::new(SyncMode::External, Serial::new(0), Serial::new(0));
        clocks.set_has_audio(true);
        assert_eq!(clocks.master_sync_type(), SyncMode::External);
    }

    #[test]
    fn vp_duration_uses_pts_delta() {
        assert_abs_diff_eq!(vp_duration(&info(1.0, 1), &info(1.05, 1), MAX_FRAME_DURATION), 0.05, epsilon = TIMESTAMP_EPSILON);
    }

    #[test]
    fn vp_duration_falls_back_to_estimate() {
        assert_abs_diff_eq!(vp_duration(&info(1.0, 1), &info(0.9, 1), MAX_FRAME_DURATION), 0.04);
        assert_abs_diff_eq!(vp_duration(&info(1.0, 1), &info(f64::NAN, 1), MAX_FRAME_DURATION), 0.04);
        assert_abs_diff_eq!(vp_duration(&info(1.0, 1), &info(30.0, 1), 10.0), 0.04);
        assert_abs_diff_eq!(vp_duration(&info(1.0, 1), &info(1.04, 2), MAX_FRAME_DURATION), 0.0);
    }

    #[test]
    fn lagging_video_shortens_delay() {
        // Video 200 ms behind an audio master, nominal 40 ms frames.
        let delay = compute_target_delay(0.04, Some(-0.2), MAX_FRAME_DURATION);
        assert_abs_diff_eq!(delay, 0.0);
        let delay = compute_target_delay(0.04, Some(-0.05), MAX_FRAME_DURATION);
        assert_abs_diff_eq!(delay, 0.0);
        let delay = compute_target_delay(0.2, Some(-0.15), MAX_FRAME_DURATION);
        assert_abs_diff_eq!(delay, 0.05, epsilon = TIMESTAMP_EPSILON);
    }

    #[test]
    fn leading_video_lengthens_delay() {
        // Long frames: add the difference.
        assert_abs_diff_eq!(compute_target_delay(0.2, Some(0.15), MAX_FRAME_DURATION), 0.35, epsilon = TIMESTAMP_EPSILON);
        // Short frames: repeat instead of a large jump.
        assert_abs_diff_eq!(compute_target_delay(0.04, Some(0.05), MAX_FRAME_DURATION), 0.08, epsilon = TIMESTAMP_EPSILON);
    }

    #[test]
    fn small_or_implausible_diff_is_ignored() {
        assert_abs_diff_eq!(compute_target_delay(0.04, Some(0.01), MAX_FRAME_DURATION), 0.04);
        assert_abs_diff_eq!(compute_target_delay(0.04, Some(-20.0), 10.0), 0.04);
        assert_abs_diff_eq!(compute_target_delay(0.04, Some(f64::NAN), MAX_FRAME_DURATION), 0.04);
        assert_abs_diff_eq!(compute_target_delay(0.04, None, MAX_FRAME_DURATION), 0.04);
    }

    #[test]
    fn starved_queue_slows_external_clock_one_step() {
        let levels = QueueLevels {
            video: Some(1),
            audio: None,
        };
        let speed = external_clock_speed(1.0, levels).expect("speed change");
        assert_abs_diff_eq!(speed, 1.0 - EXTERNAL_CLOCK_SPEED_STEP, epsilon = 1e-12);
        assert_abs_diff_eq!(
            external_clock_speed(EXTERNAL_CLOCK_SPEED_MIN, levels).expect("floor"),
            EXTERNAL_CLOCK_SPEED_MIN
        );
    }

    #[test]
    fn full_queues_speed_up_external_clock() {
        let levels = QueueLevels {
            video: Some(20),
            audio: Some(30),
        };
        let speed = external_clock_speed(1.0, levels).expect("speed change");
        assert_abs_diff_eq!(speed, 1.0 + EXTERNAL_CLOCK_SPEED_STEP, epsilon = 1e-12);
        assert_abs_diff_eq!(
            external_clock_speed(EXTERNAL_CLOCK_SPEED_MAX, levels).expect("ceiling"),
            EXTERNAL_CLOCK_SPEED_MAX
        );
    }

    #[test]
    fn moderate_levels_relax_toward_unity() {
        let levels = QueueLevels {
            video: Some(5),
            audio: None,
        };
        assert_eq!(external_clock_speed(1.0, levels), None);
        assert_abs_diff_eq!(external_clock_speed(0.95, levels).expect("relax"), 0.951, epsilon = 1e-12);
        assert_abs_diff_eq!(external_clock_speed(1.005, levels).expect("relax"), 1.004, epsilon = 1e-12);
    }

    #[test]
    fn external_clock_snaps_to_far_slave() {
        let clocks = Clocks::new(SyncMode::External, Serial::new(0), Serial::new(1));
        clocks.video.set(5.0, 1);
        clocks.external.sync_to_slave(&clocks.video);
        assert_abs_diff_eq!(clocks.external.get(), 5.0, epsilon = 0.01);
        clocks.video.set(5.0 + AV_NOSYNC_THRESHOLD + 1.0, 1);
        clocks.external.sync_to_slave(&clocks.video);
        assert_eq!(clocks.external.serial(), 1);
    }

    #[derive(Default)]
    struct Recorded {
        images: usize,
        overlays: usize,
        clears: usize,
        presents: usize,
    }

    struct RecordingRenderer(Arc<Mutex<Recorded>>);

    impl Renderer for RecordingRenderer {
        fn upload_image(&mut self, _image: &PixelBuffer) -> Result<()> {
            self.0.lock().images += 1;
            Ok(())
        }

        fn upload_overlay(&mut self, _overlay: &SubtitleOverlay) -> Result<()> {
            self.0.lock().overlays += 1;
            Ok(())
        }

        fn clear_overlay(&mut self) {
            self.0.lock().clears += 1;
        }

        fn present(&mut self) -> Result<()> {
            self.0.lock().presents += 1;
            Ok(())
        }
    }

    struct Passthrough;

    impl ImageConverter<u32> for Passthrough {
        fn convert(&mut self, _picture: &u32) -> Result<PixelBuffer> {
            Ok(PixelBuffer {
                width: 1,
                height: 1,
                sample_aspect_ratio: 1.0,
                rgba: vec![0; 4],
            })
        }
    }

    struct Fixture {
        packets: PacketQueue<()>,
        subtitle_packets: PacketQueue<()>,
        pictures: Arc<FrameQueue<u32>>,
        subtitles: Arc<FrameQueue<SubtitleOverlay>>,
        clocks: Arc<Clocks>,
        controls: Arc<PlaybackControls>,
        recorded: Arc<Mutex<Recorded>>,
    }

    impl Fixture {
        fn new(sync: SyncMode) -> Self {
            let packets = PacketQueue::new();
            packets.start();
            let subtitle_packets = PacketQueue::new();
            subtitle_packets.start();
            let pictures = Arc::new(FrameQueue::new(3, true, packets.abort_handle(), packets.serial_handle()));
            let subtitles = Arc::new(FrameQueue::new(
                16,
                false,
                subtitle_packets.abort_handle(),
                subtitle_packets.serial_handle(),
            ));
            let clocks = Arc::new(Clocks::new(sync, Serial::new(0), packets.serial_handle()));
            clocks.set_has_video(true);
            Self {
                packets,
                subtitle_packets,
                pictures,
                subtitles,
                clocks,
                controls: Arc::new(PlaybackControls::default()),
                recorded: Arc::new(Mutex::new(Recorded::default())),
            }
        }

        fn scheduler(&self, framedrop: FrameDropMode) -> SyncScheduler<u32> {
            SyncScheduler::new(
                Arc::clone(&self.pictures),
                Arc::clone(&self.subtitles),
                Arc::clone(&self.clocks),
                Arc::clone(&self.controls),
                Box::new(Passthrough),
                Box::new(RecordingRenderer(Arc::clone(&self.recorded))),
                framedrop,
                MAX_FRAME_DURATION,
            )
        }

        fn push_picture(&self, pts: f64) {
            let serial = self.packets.serial();
            self.pictures
                .peek_writable()
                .expect("slot")
                .push(Frame::new(info(pts, serial), 0));
        }

        fn push_subtitle(&self, pts: f64, start: f64, end: f64) {
            let serial = self.subtitle_packets.serial();
            let overlay = SubtitleOverlay {
                start_display: start,
                end_display: end,
                bitmap: true,
                rects: Vec::new(),
                width: 0,
                height: 0,
            };
            self.subtitles
                .peek_writable()
                .expect("slot")
                .push(Frame::new(info(pts, serial), overlay));
        }
    }

    #[test]
    fn first_frame_is_displayed_and_sets_video_clock() {
        let fx = Fixture::new(SyncMode::Video);
        let mut scheduler = fx.scheduler(FrameDropMode::Auto);
        fx.push_picture(0.0);
        fx.push_picture(0.04);
        let mut remaining = 0.01;
        scheduler.refresh_at(100.0, &mut remaining, QueueLevels::default());
        assert!(fx.pictures.has_shown());
        assert_eq!(fx.recorded.lock().images, 1);
        assert_eq!(fx.recorded.lock().presents, 1);
        assert_abs_diff_eq!(fx.clocks.video.pts(), 0.0);
    }

    #[test]
    fn early_tick_reports_remaining_time() {
        let fx = Fixture::new(SyncMode::Video);
        let mut scheduler = fx.scheduler(FrameDropMode::Auto);
        fx.push_picture(0.0);
        fx.push_picture(0.04);
        let mut remaining = 0.01;
        scheduler.refresh_at(100.0, &mut remaining, QueueLevels::default());

        // Next frame is due 40 ms after the first; 15 ms have elapsed.
        let mut remaining = 0.01;
        scheduler.refresh_at(100.015, &mut remaining, QueueLevels::default());
        assert_abs_diff_eq!(remaining, 0.01);
        assert_eq!(fx.pictures.nb_remaining(), 1);

        let mut remaining = 1.0;
        scheduler.refresh_at(100.02, &mut remaining, QueueLevels::default());
        assert_abs_diff_eq!(remaining, 0.02, epsilon = TIMESTAMP_EPSILON);
    }

    #[test]
    fn late_frames_are_dropped_when_allowed() {
        let fx = Fixture::new(SyncMode::Audio);
        fx.clocks.set_has_audio(true);
        let mut scheduler = fx.scheduler(FrameDropMode::Always);
        fx.push_picture(0.0);
        let mut remaining = 0.01;
        scheduler.refresh_at(100.0, &mut remaining, QueueLevels::default());
        fx.push_picture(0.04);
        fx.push_picture(0.08);
        // Past the deadline of 0.08 too: 0.04 is dropped, 0.08 shown.
        scheduler.refresh_at(100.09, &mut remaining, QueueLevels::default());
        assert_eq!(scheduler.frame_drops_late(), 1);
        assert_abs_diff_eq!(fx.clocks.video.pts(), 0.08);
    }

    #[test]
    fn never_mode_keeps_late_frames() {
        let fx = Fixture::new(SyncMode::Audio);
        fx.clocks.set_has_audio(true);
        let mut scheduler = fx.scheduler(FrameDropMode::Never);
        fx.push_picture(0.0);
        let mut remaining = 0.01;
        scheduler.refresh_at(100.0, &mut remaining, QueueLevels::default());
        fx.push_picture(0.04);
        fx.push_picture(0.08);
        scheduler.refresh_at(100.09, &mut remaining, QueueLevels::default());
        assert_eq!(scheduler.frame_drops_late(), 0);
        assert_abs_diff_eq!(fx.clocks.video.pts(), 0.04);
    }

    #[test]
    fn stale_epoch_frames_are_skipped() {
        let fx = Fixture::new(SyncMode::Video);
        let mut scheduler = fx.scheduler(FrameDropMode::Auto);
        fx.push_picture(7.0);
        fx.packets.put_flush();
        fx.push_picture(0.5);
        let mut remaining = 0.01;
        scheduler.refresh_at(100.0, &mut remaining, QueueLevels::default());
        assert_abs_diff_eq!(fx.clocks.video.pts(), 0.5);
        assert_eq!(fx.clocks.video.serial(), fx.packets.serial());
    }

    #[test]
    fn step_shows_one_frame_then_pauses() {
        let fx = Fixture::new(SyncMode::Video);
        let mut scheduler = fx.scheduler(FrameDropMode::Auto);
        fx.push_picture(0.0);
        let mut remaining = 0.01;
        scheduler.toggle_pause();
        assert!(fx.controls.is_paused());
        scheduler.step_to_next_frame();
        assert!(!fx.controls.is_paused());
        scheduler.refresh_at(wall_time() + 1.0, &mut remaining, QueueLevels::default());
        assert!(fx.controls.is_paused());
        assert!(fx.clocks.video.is_paused());
    }

    #[test]
    fn expired_subtitles_are_retired() {
        let fx = Fixture::new(SyncMode::Video);
        let mut scheduler = fx.scheduler(FrameDropMode::Auto);
        scheduler.set_subtitles_open(true);
        fx.push_subtitle(0.0, 0.0, 0.5);
        fx.push_subtitle(0.6, 0.0, 2.0);
        fx.push_picture(0.0);
        let mut remaining = 0.01;
        scheduler.refresh_at(100.0, &mut remaining, QueueLevels::default());
        assert_eq!(fx.recorded.lock().overlays, 1);
        assert_eq!(fx.subtitles.nb_remaining(), 2);

        fx.push_picture(1.0);
        scheduler.refresh_at(101.0, &mut remaining, QueueLevels::default());
        // First subtitle ended at 0.5 and was on screen.
        assert_eq!(fx.subtitles.nb_remaining(), 1);
        assert_eq!(fx.recorded.lock().clears, 1);
        assert_eq!(fx.recorded.lock().overlays, 2);
    }
}
