// SPDX-License-Identifier: MPL-2.0
//! Presentation loop and input mapping.
//!
//! The loop is cooperative: it drains pending events, sleeps for whatever
//! time the previous refresh tick left, then ticks the scheduler again.
//! It never blocks on the event channel while a frame may be due.

use std::thread;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::mpsc::error::TryRecvError;

use super::decoder::StreamKind;
use super::event::{EventReceiver, PlayerAction, PlayerEvent, TerminationReason};
use super::session::Session;
use super::time_units::wall_time;
use crate::application::port::{MediaBackend, PixelBuffer, Renderer, SubtitleOverlay};
use crate::config::{
    DOUBLE_CLICK_SECS, LONG_SEEK_SECS, PAGE_SEEK_SECS, REFRESH_RATE, STATUS_INTERVAL_SECS,
    VOLUME_STEP_DB,
};
use crate::error::Result;

/// Keys the player reacts to, independent of the windowing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Escape,
    Space,
    Left,
    Right,
    Up,
    Down,
    PageUp,
    PageDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

/// Maps a key press to an action; `seek_interval` is the arrow-key step in seconds.
#[must_use]
pub fn action_for_key(key: Key, seek_interval: f64) -> Option<PlayerAction> {
    let action = match key {
        Key::Escape | Key::Char('q') => PlayerAction::Quit,
        Key::Char('f') => PlayerAction::ToggleFullscreen,
        Key::Space | Key::Char('p') => PlayerAction::TogglePause,
        Key::Char('m') => PlayerAction::ToggleMute,
        Key::Char('0' | '*') => PlayerAction::VolumeUp,
        Key::Char('9' | '/') => PlayerAction::VolumeDown,
        Key::Char('s') => PlayerAction::StepFrame,
        Key::Char('a') => PlayerAction::CycleAudio,
        Key::Char('v') => PlayerAction::CycleVideo,
        Key::Char('t') => PlayerAction::CycleSubtitle,
        Key::Char('c') => PlayerAction::CycleProgram,
        Key::Left => PlayerAction::Seek(-seek_interval),
        Key::Right => PlayerAction::Seek(seek_interval),
        Key::Down => PlayerAction::Seek(-LONG_SEEK_SECS),
        Key::Up => PlayerAction::Seek(LONG_SEEK_SECS),
        Key::PageDown => PlayerAction::Chapter(-1),
        Key::PageUp => PlayerAction::Chapter(1),
        Key::Char(_) => return None,
    };
    Some(action)
}

/// Turns pointer clicks into actions.
#[derive(Debug, Default)]
pub struct PointerMapper {
    last_left_click: Option<f64>,
}

impl PointerMapper {
    /// `x_fraction` is the click position across the window width, `time` the wall time.
    pub fn click(&mut self, button: MouseButton, x_fraction: f64, time: f64) -> Option<PlayerAction> {
        match button {
            MouseButton::Left => {
                let double = self
                    .last_left_click
                    .is_some_and(|last| time - last <= DOUBLE_CLICK_SECS);
                if double {
                    self.last_left_click = None;
                    Some(PlayerAction::ToggleFullscreen)
                } else {
                    self.last_left_click = Some(time);
                    None
                }
            }
            MouseButton::Right => Some(PlayerAction::SeekFraction(x_fraction.clamp(0.0, 1.0))),
        }
    }
}

/// Renderer that accepts every upload and shows nothing.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    pub frames_presented: u64,
    pub last_size: Option<(u32, u32)>,
    pub overlay_visible: bool,
    pub fullscreen: bool,
}

impl Renderer for HeadlessRenderer {
    fn upload_image(&mut self, image: &PixelBuffer) -> Result<()> {
        self.last_size = Some((image.width, image.height));
        Ok(())
    }

    fn upload_overlay(&mut self, _overlay: &SubtitleOverlay) -> Result<()> {
        self.overlay_visible = true;
        Ok(())
    }

    fn clear_overlay(&mut self) {
        self.overlay_visible = false;
    }

    fn present(&mut self) -> Result<()> {
        self.frames_presented += 1;
        Ok(())
    }

    fn set_fullscreen(&mut self, fullscreen: bool) {
        self.fullscreen = fullscreen;
    }
}

/// Drives a session until it terminates.
pub struct Presenter<B: MediaBackend> {
    session: Session<B>,
    events: EventReceiver,
    fullscreen: bool,
    last_status: f64,
}

impl<B: MediaBackend> Presenter<B> {
    #[must_use]
    pub fn new(session: Session<B>, events: EventReceiver) -> Self {
        Self {
            session,
            events,
            fullscreen: false,
            last_status: 0.0,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session<B> {
        &self.session
    }

    /// Runs the loop, closes the session and reports why it ended.
    pub fn run(mut self) -> TerminationReason {
        let mut remaining_time = 0.0;
        let reason = loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if let Some(reason) = self.handle_event(event) {
                        break reason;
                    }
                    continue;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => break TerminationReason::Interrupted,
            }

            if remaining_time > 0.0 {
                thread::sleep(Duration::from_secs_f64(remaining_time));
            }
            remaining_time = REFRESH_RATE;
            self.session.refresh(&mut remaining_time);
            self.log_status();
        };
        info!("stopping: {reason}");
        self.session.close();
        reason
    }

    fn log_status(&mut self) {
        if !self.session.show_status() {
            return;
        }
        let now = wall_time();
        if now - self.last_status >= STATUS_INTERVAL_SECS {
            info!("{}", self.session.stats());
            self.last_status = now;
        }
    }

    /// Applies one event; returns the termination reason when the loop must stop.
    pub fn handle_event(&mut self, event: PlayerEvent) -> Option<TerminationReason> {
        match event {
            PlayerEvent::Terminated { reason } => Some(reason),
            PlayerEvent::Action(action) => self.handle_action(action),
        }
    }

    fn handle_action(&mut self, action: PlayerAction) -> Option<TerminationReason> {
        let session = &mut self.session;
        match action {
            PlayerAction::Quit => return Some(TerminationReason::Quit),
            PlayerAction::ToggleFullscreen => {
                self.fullscreen = !self.fullscreen;
                session.renderer_mut().set_fullscreen(self.fullscreen);
                session.force_refresh();
            }
            PlayerAction::TogglePause => session.toggle_pause(),
            PlayerAction::ToggleMute => session.toggle_mute(),
            PlayerAction::VolumeUp => session.update_volume(1, VOLUME_STEP_DB),
            PlayerAction::VolumeDown => session.update_volume(-1, VOLUME_STEP_DB),
            PlayerAction::StepFrame => session.step_to_next_frame(),
            PlayerAction::CycleAudio => cycle(session, &[StreamKind::Audio]),
            PlayerAction::CycleVideo => cycle(session, &[StreamKind::Video]),
            PlayerAction::CycleSubtitle => cycle(session, &[StreamKind::Subtitle]),
            PlayerAction::CycleProgram => cycle(
                session,
                &[StreamKind::Video, StreamKind::Audio, StreamKind::Subtitle],
            ),
            PlayerAction::Seek(incr) => session.seek_relative(incr),
            PlayerAction::Chapter(incr) => {
                if !session.has_chapters() || !session.seek_chapter(incr) {
                    session.seek_relative(f64::from(incr) * PAGE_SEEK_SECS);
                }
            }
            PlayerAction::SeekFraction(frac) => session.seek_fraction(frac),
            PlayerAction::Refresh => session.force_refresh(),
        }
        None
    }
}

fn cycle<B: MediaBackend>(session: &mut Session<B>, kinds: &[StreamKind]) {
    for kind in kinds {
        if let Err(e) = session.cycle_channel(*kind) {
            warn!("could not switch {kind} stream: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_map_to_actions() {
        assert_eq!(action_for_key(Key::Char('q'), 10.0), Some(PlayerAction::Quit));
        assert_eq!(action_for_key(Key::Escape, 10.0), Some(PlayerAction::Quit));
        assert_eq!(action_for_key(Key::Space, 10.0), Some(PlayerAction::TogglePause));
        assert_eq!(action_for_key(Key::Char('*'), 10.0), Some(PlayerAction::VolumeUp));
        assert_eq!(action_for_key(Key::Char('/'), 10.0), Some(PlayerAction::VolumeDown));
        assert_eq!(action_for_key(Key::Char('c'), 10.0), Some(PlayerAction::CycleProgram));
        assert_eq!(action_for_key(Key::Char('x'), 10.0), None);
    }

    #[test]
    fn arrow_keys_use_configured_interval() {
        assert_eq!(action_for_key(Key::Left, 5.0), Some(PlayerAction::Seek(-5.0)));
        assert_eq!(action_for_key(Key::Right, 5.0), Some(PlayerAction::Seek(5.0)));
        assert_eq!(action_for_key(Key::Up, 5.0), Some(PlayerAction::Seek(LONG_SEEK_SECS)));
        assert_eq!(action_for_key(Key::PageDown, 5.0), Some(PlayerAction::Chapter(-1)));
    }

    #[test]
    fn double_click_toggles_fullscreen() {
        let mut pointer = PointerMapper::default();
        assert_eq!(pointer.click(MouseButton::Left, 0.5, 10.0), None);
        assert_eq!(
            pointer.click(MouseButton::Left, 0.5, 10.3),
            Some(PlayerAction::ToggleFullscreen)
        );
        assert_eq!(pointer.click(MouseButton::Left, 0.5, 12.0), None);
        assert_eq!(pointer.click(MouseButton::Left, 0.5, 13.0), None);
    }

    #[test]
    fn right_click_seeks_by_fraction() {
        let mut pointer = PointerMapper::default();
        assert_eq!(
            pointer.click(MouseButton::Right, 0.25, 1.0),
            Some(PlayerAction::SeekFraction(0.25))
        );
        assert_eq!(
            pointer.click(MouseButton::Right, 1.5, 1.0),
            Some(PlayerAction::SeekFraction(1.0))
        );
    }

    #[test]
    fn headless_renderer_counts_presents() {
        let mut renderer = HeadlessRenderer::default();
        renderer
            .upload_image(&PixelBuffer {
                width: 4,
                height: 2,
                sample_aspect_ratio: 1.0,
                rgba: vec![0; 32],
            })
            .expect("upload");
        renderer.present().expect("present");
        assert_eq!(renderer.frames_presented, 1);
        assert_eq!(renderer.last_size, Some((4, 2)));
    }
}
