// SPDX-License-Identifier: MPL-2.0
//! Drift-compensated playback clocks.
//!
//! A clock stores the offset (`drift`) between its media time and wall time
//! at the last update, so its value can be computed at any instant without
//! per-tick updates:
//!
//! ```text
//! now = drift + wall - (wall - last_updated) * (1 - speed)
//! ```
//!
//! A clock trusts the epoch it was last set with. When the epoch of the
//! packet queue it follows moves on (seek, stream switch) the clock reports
//! NaN until it is set again.
//!
//! # Design Note: lock-free fields
//!
//! Clocks are written by the audio callback, the presentation loop and the
//! reader, and read by all of them. Each field is an individual atomic and
//! a multi-field update is not transactional: a reader may combine a new
//! `drift` with an old `last_updated`. The resulting error is bounded by the
//! time between two stores and is tolerated rather than guarded by a lock.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use super::serial::Serial;
use super::time_units::wall_time;
use crate::config::AV_NOSYNC_THRESHOLD;

/// `f64` stored as raw bits in an `AtomicU64`.
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// A virtual media timeline.
#[derive(Debug)]
pub struct Clock {
    pts: AtomicF64,
    pts_drift: AtomicF64,
    last_updated: AtomicF64,
    speed: AtomicF64,
    serial: AtomicI64,
    paused: AtomicBool,
    /// Epoch counter this clock is checked against; `None` checks against itself.
    queue_serial: Option<Serial>,
}

impl Clock {
    /// Creates a clock that goes stale when `queue_serial` moves past its epoch.
    #[must_use]
    pub fn new(queue_serial: Serial) -> Self {
        Self::with_queue_serial(Some(queue_serial))
    }

    /// Creates a free-running clock that is never stale (the external clock).
    #[must_use]
    pub fn free_running() -> Self {
        Self::with_queue_serial(None)
    }

    fn with_queue_serial(queue_serial: Option<Serial>) -> Self {
        let clock = Self {
            pts: AtomicF64::new(f64::NAN),
            pts_drift: AtomicF64::new(f64::NAN),
            last_updated: AtomicF64::new(0.0),
            speed: AtomicF64::new(1.0),
            serial: AtomicI64::new(-1),
            paused: AtomicBool::new(false),
            queue_serial,
        };
        clock.set(f64::NAN, -1);
        clock
    }

    fn trusted_serial(&self) -> i64 {
        match &self.queue_serial {
            Some(serial) => serial.get(),
            None => self.serial(),
        }
    }

    /// Current media time in seconds, NaN when unknown or stale.
    #[must_use]
    pub fn get(&self) -> f64 {
        self.get_at(wall_time())
    }

    /// Media time at wall time `time`.
    #[must_use]
    pub fn get_at(&self, time: f64) -> f64 {
        if self.trusted_serial() != self.serial() {
            return f64::NAN;
        }
        if self.is_paused() {
            return self.pts.load();
        }
        let last_updated = self.last_updated.load();
        self.pts_drift.load() + time - (time - last_updated) * (1.0 - self.speed())
    }

    /// Anchors the clock at `pts` for epoch `serial` as of wall time `time`.
    pub fn set_at(&self, pts: f64, serial: i64, time: f64) {
        self.pts.store(pts);
        self.last_updated.store(time);
        self.pts_drift.store(pts - time);
        self.serial.store(serial, Ordering::Relaxed);
    }

    /// Anchors the clock at `pts` for epoch `serial` now.
    pub fn set(&self, pts: f64, serial: i64) {
        self.set_at(pts, serial, wall_time());
    }

    /// Changes speed without moving the current value.
    pub fn set_speed(&self, speed: f64) {
        self.set(self.get(), self.serial());
        self.speed.store(speed);
    }

    #[must_use]
    pub fn speed(&self) -> f64 {
        self.speed.load()
    }

    /// Epoch the clock was last set with.
    #[must_use]
    pub fn serial(&self) -> i64 {
        self.serial.load(Ordering::Relaxed)
    }

    /// Raw media time stored at the last update.
    #[must_use]
    pub fn pts(&self) -> f64 {
        self.pts.load()
    }

    /// Wall time of the last update.
    #[must_use]
    pub fn last_updated(&self) -> f64 {
        self.last_updated.load()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Snaps `self` to `slave` when they disagree by more than the no-sync threshold.
    pub fn sync_to_slave(&self, slave: &Clock) {
        let clock = self.get();
        let slave_clock = slave.get();
        if !slave_clock.is_nan()
            && (clock.is_nan() || (clock - slave_clock).abs() > AV_NOSYNC_THRESHOLD)
        {
            self.set(slave_clock, slave.serial());
        }
    }
}
