// SPDX-License-Identifier: MPL-2.0
//! User-facing playback switches shared across threads.
//!
//! The presentation thread mutates these through session setters; the
//! audio callback and the reader only read them (the reader may also ask
//! for a frame step after a seek while paused).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use super::volume::Volume;
use crate::config::FrameDropMode;

/// Pause, mute, volume, framedrop and step-request flags.
#[derive(Debug)]
pub struct PlaybackControls {
    paused: AtomicBool,
    muted: AtomicBool,
    volume: AtomicU8,
    framedrop: AtomicU8,
    step_request: AtomicBool,
}

fn framedrop_to_u8(mode: FrameDropMode) -> u8 {
    match mode {
        FrameDropMode::Auto => 0,
        FrameDropMode::Always => 1,
        FrameDropMode::Never => 2,
    }
}

impl PlaybackControls {
    #[must_use]
    pub fn new(volume: Volume, muted: bool) -> Self {
        Self {
            paused: AtomicBool::new(false),
            muted: AtomicBool::new(muted),
            volume: AtomicU8::new(volume.level()),
            framedrop: AtomicU8::new(framedrop_to_u8(FrameDropMode::default())),
            step_request: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub(crate) fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    #[must_use]
    pub fn volume(&self) -> Volume {
        Volume::new(self.volume.load(Ordering::Relaxed))
    }

    pub(crate) fn set_volume(&self, volume: Volume) {
        self.volume.store(volume.level(), Ordering::Relaxed);
    }

    /// When decoded or displayed video may be dropped to catch up.
    #[must_use]
    pub fn framedrop(&self) -> FrameDropMode {
        match self.framedrop.load(Ordering::Relaxed) {
            1 => FrameDropMode::Always,
            2 => FrameDropMode::Never,
            _ => FrameDropMode::Auto,
        }
    }

    pub(crate) fn set_framedrop(&self, mode: FrameDropMode) {
        self.framedrop.store(framedrop_to_u8(mode), Ordering::Relaxed);
    }

    /// Asks the presentation thread to show one frame while paused.
    pub(crate) fn request_step(&self) {
        self.step_request.store(true, Ordering::Release);
    }

    /// Consumes a pending step request.
    pub(crate) fn take_step_request(&self) -> bool {
        self.step_request.swap(false, Ordering::AcqRel)
    }
}

impl Default for PlaybackControls {
    fn default() -> Self {
        Self::new(Volume::default(), false)
    }
}
