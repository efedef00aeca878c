// SPDX-License-Identifier: MPL-2.0
//! Bounded ring buffer of decoded frames.
//!
//! One decoder thread writes, one consumer (scheduler or audio callback)
//! reads. Slots own their payload until [`FrameQueue::advance`] releases
//! them. In keep-last mode the most recently shown frame stays in the ring
//! after being advanced past once, so the display can always redraw it.
//!
//! The queue shares the abort flag and serial of the packet queue feeding
//! its decoder: aborting the packet queue and calling
//! [`FrameQueue::signal`] unblocks both sides.

use parking_lot::{Condvar, Mutex};

use super::serial::{AbortHandle, Serial};
use crate::config::FRAME_QUEUE_SIZE;

/// Timing metadata of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    /// Presentation time in seconds, NaN when unknown.
    pub pts: f64,
    /// Estimated duration in seconds.
    pub duration: f64,
    /// Byte position of the source packet.
    pub pos: Option<i64>,
    /// Epoch of the packet this frame was decoded from.
    pub serial: i64,
}

/// A decoded frame owned by a queue slot.
#[derive(Debug)]
pub struct Frame<T> {
    pub info: FrameInfo,
    pub payload: T,
    /// Set once the payload has been handed to the display backend.
    pub uploaded: bool,
}

impl<T> Frame<T> {
    #[must_use]
    pub fn new(info: FrameInfo, payload: T) -> Self {
        Self {
            info,
            payload,
            uploaded: false,
        }
    }
}

struct Ring<T> {
    slots: Vec<Option<Frame<T>>>,
    rindex: usize,
    windex: usize,
    size: usize,
    rindex_shown: usize,
}

/// Fixed-capacity frame ring with blocking read/write access.
pub struct FrameQueue<T> {
    ring: Mutex<Ring<T>>,
    cond: Condvar,
    max_size: usize,
    keep_last: bool,
    abort: AbortHandle,
    serial: Serial,
}

/// Proof that a slot is free; consumed by [`WriteSlot::push`].
pub struct WriteSlot<'a, T> {
    queue: &'a FrameQueue<T>,
}

impl<T> WriteSlot<'_, T> {
    /// Moves `frame` into the reserved slot and publishes it.
    pub fn push(self, frame: Frame<T>) {
        self.queue.push(frame);
    }
}

impl<T> FrameQueue<T> {
    /// Creates a queue bound to the abort flag and serial of its packet queue.
    ///
    /// `capacity` is clamped to `1..=FRAME_QUEUE_SIZE`.
    #[must_use]
    pub fn new(capacity: usize, keep_last: bool, abort: AbortHandle, serial: Serial) -> Self {
        let max_size = capacity.clamp(1, FRAME_QUEUE_SIZE);
        Self {
            ring: Mutex::new(Ring {
                slots: (0..max_size).map(|_| None).collect(),
                rindex: 0,
                windex: 0,
                size: 0,
                rindex_shown: 0,
            }),
            cond: Condvar::new(),
            max_size,
            keep_last,
            abort,
            serial,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Wakes every waiter so it can observe an abort.
    pub fn signal(&self) {
        let _ring = self.ring.lock();
        self.cond.notify_all();
    }

    /// Blocks until a slot is free. Returns `None` once aborted.
    pub fn peek_writable(&self) -> Option<WriteSlot<'_, T>> {
        let mut ring = self.ring.lock();
        while ring.size >= self.max_size && !self.abort.is_aborted() {
            self.cond.wait(&mut ring);
        }
        if self.abort.is_aborted() {
            return None;
        }
        Some(WriteSlot { queue: self })
    }

    fn push(&self, frame: Frame<T>) {
        let mut ring = self.ring.lock();
        let windex = ring.windex;
        ring.slots[windex] = Some(frame);
        ring.windex = (windex + 1) % self.max_size;
        ring.size += 1;
        self.cond.notify_one();
    }

    /// Blocks until an unread frame exists. Returns `None` once aborted.
    pub fn peek_readable(&self) -> Option<FrameInfo> {
        let mut ring = self.ring.lock();
        while ring.size <= ring.rindex_shown && !self.abort.is_aborted() {
            self.cond.wait(&mut ring);
        }
        if self.abort.is_aborted() {
            return None;
        }
        let index = (ring.rindex + ring.rindex_shown) % self.max_size;
        ring.slots[index].as_ref().map(|f| f.info)
    }

    /// The frame to be shown next.
    #[must_use]
    pub fn peek_current(&self) -> Option<FrameInfo> {
        self.peek_at(Slot::Current)
    }

    /// The frame after the current one.
    #[must_use]
    pub fn peek_next(&self) -> Option<FrameInfo> {
        self.peek_at(Slot::Next)
    }

    /// The frame shown last (keep-last mode), or the current one.
    #[must_use]
    pub fn peek_last(&self) -> Option<FrameInfo> {
        self.peek_at(Slot::Last)
    }

    fn peek_at(&self, slot: Slot) -> Option<FrameInfo> {
        let ring = self.ring.lock();
        let index = slot.index(&ring, self.max_size);
        ring.slots[index].as_ref().map(|f| f.info)
    }

    /// Runs `f` on the current frame, if any.
    pub fn with_current<R>(&self, f: impl FnOnce(&mut Frame<T>) -> R) -> Option<R> {
        self.with_slot(Slot::Current, f)
    }

    /// Runs `f` on the frame after the current one, if any.
    pub fn with_next<R>(&self, f: impl FnOnce(&mut Frame<T>) -> R) -> Option<R> {
        self.with_slot(Slot::Next, f)
    }

    /// Runs `f` on the last shown frame, if any.
    pub fn with_last<R>(&self, f: impl FnOnce(&mut Frame<T>) -> R) -> Option<R> {
        self.with_slot(Slot::Last, f)
    }

    fn with_slot<R>(&self, slot: Slot, f: impl FnOnce(&mut Frame<T>) -> R) -> Option<R> {
        let mut ring = self.ring.lock();
        let index = slot.index(&ring, self.max_size);
        ring.slots[index].as_mut().map(f)
    }

    /// Releases the current read slot.
    ///
    /// In keep-last mode the first call after population only marks the
    /// current frame as shown.
    pub fn advance(&self) {
        let mut ring = self.ring.lock();
        if self.keep_last && ring.rindex_shown == 0 {
            ring.rindex_shown = 1;
            return;
        }
        let rindex = ring.rindex;
        ring.slots[rindex] = None;
        ring.rindex = (rindex + 1) % self.max_size;
        ring.size -= 1;
        self.cond.notify_one();
    }

    /// Number of frames not yet shown.
    #[must_use]
    pub fn nb_remaining(&self) -> usize {
        let ring = self.ring.lock();
        ring.size - ring.rindex_shown
    }

    /// Number of occupied slots, including a kept last frame.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once a frame has been shown and kept.
    #[must_use]
    pub fn has_shown(&self) -> bool {
        self.ring.lock().rindex_shown == 1
    }

    /// Byte position of the last shown frame if it belongs to the current epoch.
    #[must_use]
    pub fn last_shown_position(&self) -> Option<i64> {
        let ring = self.ring.lock();
        if ring.rindex_shown == 0 {
            return None;
        }
        let frame = ring.slots[ring.rindex].as_ref()?;
        if frame.info.serial == self.serial.get() {
            frame.info.pos
        } else {
            None
        }
    }

    /// Current epoch of the governing packet queue.
    #[must_use]
    pub fn serial(&self) -> i64 {
        self.serial.get()
    }
}

#[derive(Clone, Copy)]
enum Slot {
    Current,
    Next,
    Last,
}

impl Slot {
    fn index<T>(self, ring: &Ring<T>, max_size: usize) -> usize {
        match self {
            Slot::Current => (ring.rindex + ring.rindex_shown) % max_size,
            Slot::Next => (ring.rindex + ring.rindex_shown + 1) % max_size,
            Slot::Last => ring.rindex,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn info(pts: f64, serial: i64) -> FrameInfo {
        FrameInfo {
            pts,
            duration: 0.04,
            pos: Some((pts * 1000.0) as i64),
            serial,
        }
    }

    fn queue(capacity: usize, keep_last: bool) -> (FrameQueue<u32>, AbortHandle, Serial) {
        let abort = AbortHandle::new(false);
        let serial = Serial::new(1);
        let q = FrameQueue::new(capacity, keep_last, abort.clone(), serial.clone());
        (q, abort, serial)
    }

    fn push(q: &FrameQueue<u32>, pts: f64, serial: i64) {
        q.peek_writable()
            .expect("queue aborted")
            .push(Frame::new(info(pts, serial), pts as u32));
    }

    #[test]
    fn capacity_is_clamped() {
        let (q, _, _) = queue(100, false);
        assert_eq!(q.capacity(), FRAME_QUEUE_SIZE);
        let (q, _, _) = queue(0, false);
        assert_eq!(q.capacity(), 1);
    }

    #[test]
    fn keep_last_first_advance_only_marks_shown() {
        let (q, _, _) = queue(3, true);
        push(&q, 1.0, 1);
        push(&q, 2.0, 1);

        q.advance();
        assert_eq!(q.len(), 2);
        assert_eq!(q.nb_remaining(), 1);
        assert_eq!(q.peek_last().map(|i| i.pts), Some(1.0));
        assert_eq!(q.peek_current().map(|i| i.pts), Some(2.0));

        q.advance();
        assert_eq!(q.len(), 1);
        assert_eq!(q.peek_last().map(|i| i.pts), Some(2.0));
        assert_eq!(q.nb_remaining(), 0);
    }

    #[test]
    fn plain_queue_releases_on_every_advance() {
        let (q, _, _) = queue(16, false);
        push(&q, 1.0, 1);
        push(&q, 2.0, 1);
        assert_eq!(q.peek_next().map(|i| i.pts), Some(2.0));
        q.advance();
        assert_eq!(q.len(), 1);
        assert_eq!(q.peek_current().map(|i| i.pts), Some(2.0));
        assert!(q.peek_next().is_none());
    }

    #[test]
    fn writer_blocks_while_full() {
        let (q, _, _) = queue(2, false);
        let q = Arc::new(q);
        push(&q, 1.0, 1);
        push(&q, 2.0, 1);

        let writer = {
            let q = Arc::clone(&q);
            thread::spawn(move || push(&q, 3.0, 1))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(q.len(), 2);
        q.advance();
        writer.join().expect("writer panicked");
        assert_eq!(q.len(), 2);
        assert_eq!(q.peek_next().map(|i| i.pts), Some(3.0));
    }

    #[test]
    fn abort_releases_blocked_reader() {
        let (q, abort, _) = queue(3, true);
        let q = Arc::new(q);
        let reader = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.peek_readable())
        };
        thread::sleep(Duration::from_millis(20));
        abort.set(true);
        q.signal();
        assert!(reader.join().expect("reader panicked").is_none());
        assert!(q.peek_writable().is_none());
    }

    #[test]
    fn last_shown_position_requires_current_epoch() {
        let (q, _, serial) = queue(3, true);
        push(&q, 1.5, 1);
        assert_eq!(q.last_shown_position(), None);
        q.advance();
        assert_eq!(q.last_shown_position(), Some(1500));
        serial.bump();
        assert_eq!(q.last_shown_position(), None);
    }

    #[test]
    fn with_last_allows_marking_uploaded() {
        let (q, _, _) = queue(3, true);
        push(&q, 1.0, 1);
        q.advance();
        assert_eq!(q.with_last(|f| std::mem::replace(&mut f.uploaded, true)), Some(false));
        assert_eq!(q.with_last(|f| f.uploaded), Some(true));
    }
}
