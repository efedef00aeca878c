// SPDX-License-Identifier: MPL-2.0
//! Shared epoch counters and abort flags.
//!
//! A packet queue owns the authoritative serial of its stream. Clocks,
//! frame queues and decoder harnesses hold a cloned [`Serial`] handle to
//! the same counter so they can detect stale data without holding a
//! reference to the queue itself.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Handle to a shared epoch counter.
///
/// Cloning the handle shares the counter; it never copies the value.
#[derive(Debug, Clone, Default)]
pub struct Serial(Arc<AtomicI64>);

impl Serial {
    #[must_use]
    pub fn new(initial: i64) -> Self {
        Self(Arc::new(AtomicI64::new(initial)))
    }

    #[must_use]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }

    /// Increments the counter and returns the new epoch.
    pub(crate) fn bump(&self) -> i64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns true if both handles point at the same counter.
    #[must_use]
    pub fn shares_counter(&self, other: &Serial) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Handle to a shared one-way abort flag.
///
/// Only the owning queue may raise or clear it; everyone else observes.
#[derive(Debug, Clone)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    #[must_use]
    pub fn new(aborted: bool) -> Self {
        Self(Arc::new(AtomicBool::new(aborted)))
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, aborted: bool) {
        self.0.store(aborted, Ordering::Release);
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new(false)
    }
}
