// SPDX-License-Identifier: MPL-2.0
//! Thread-safe FIFO of compressed units.
//!
//! The reader thread is the only producer and one decoder harness is the
//! only consumer. Every item carries the serial (epoch) that was current
//! when it was queued; a flush marker bumps the serial, which is how a seek
//! invalidates everything already in flight downstream.
//!
//! ```text
//!  reader ──put──▶ [ Flush(s=1) | Unit(s=1) | Unit(s=1) | Sentinel(s=1) ] ──get──▶ harness
//!                    ▲ start()/seek bumps serial
//! ```

use std::collections::VecDeque;
use std::mem;

use parking_lot::{Condvar, Mutex};

use super::serial::{AbortHandle, Serial};

/// One compressed unit as produced by a demuxer.
///
/// `payload` is `None` for the end-of-stream sentinel: a zero-size unit that
/// asks the decoder to drain its internal buffering.
#[derive(Debug)]
pub struct CompressedUnit<P> {
    pub stream_index: usize,
    /// Presentation timestamp in stream time base.
    pub pts: Option<i64>,
    /// Decode timestamp in stream time base.
    pub dts: Option<i64>,
    /// Duration in stream time base, 0 when unknown.
    pub duration: i64,
    /// Byte offset in the source.
    pub pos: Option<i64>,
    /// Payload size in bytes.
    pub size: usize,
    pub payload: Option<P>,
}

impl<P> CompressedUnit<P> {
    /// Creates a unit carrying `payload`.
    #[must_use]
    pub fn new(stream_index: usize, payload: P, size: usize) -> Self {
        Self {
            stream_index,
            pts: None,
            dts: None,
            duration: 0,
            pos: None,
            size,
            payload: Some(payload),
        }
    }

    /// Creates the drain sentinel for `stream_index`.
    #[must_use]
    pub fn sentinel(stream_index: usize) -> Self {
        Self {
            stream_index,
            pts: None,
            dts: None,
            duration: 0,
            pos: None,
            size: 0,
            payload: None,
        }
    }

    #[must_use]
    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.pts = pts;
        self
    }

    #[must_use]
    pub fn with_dts(mut self, dts: Option<i64>) -> Self {
        self.dts = dts;
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    #[must_use]
    pub fn with_pos(mut self, pos: Option<i64>) -> Self {
        self.pos = pos;
        self
    }

    /// Returns true for the end-of-stream sentinel.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.payload.is_none()
    }
}

/// An item as stored in the queue.
#[derive(Debug)]
pub enum QueuedPacket<P> {
    /// Decoder reset marker; queuing it starts a new epoch.
    Flush,
    Unit(CompressedUnit<P>),
}

/// Result of [`PacketQueue::get`].
#[derive(Debug)]
pub enum Dequeued<P> {
    /// The queue was aborted; the consumer must stop.
    Aborted,
    /// Non-blocking get found nothing.
    Empty,
    /// An item together with the epoch it was queued under.
    Packet { packet: QueuedPacket<P>, serial: i64 },
}

/// Counters of a packet queue, read under a single lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub nb_packets: usize,
    /// Payload bytes plus per-entry bookkeeping.
    pub size: usize,
    /// Sum of unit durations in stream time base.
    pub duration: i64,
}

struct Entry<P> {
    packet: QueuedPacket<P>,
    serial: i64,
    size: usize,
}

struct Contents<P> {
    entries: VecDeque<Entry<P>>,
    stats: QueueStats,
}

/// Blocking FIFO of compressed units with epoch tracking.
pub struct PacketQueue<P> {
    contents: Mutex<Contents<P>>,
    cond: Condvar,
    abort: AbortHandle,
    serial: Serial,
}

impl<P> Default for PacketQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PacketQueue<P> {
    /// Creates an empty queue in the aborted state; call [`start`](Self::start) to use it.
    #[must_use]
    pub fn new() -> Self {
        Self {
            contents: Mutex::new(Contents {
                entries: VecDeque::new(),
                stats: QueueStats::default(),
            }),
            cond: Condvar::new(),
            abort: AbortHandle::new(true),
            serial: Serial::new(0),
        }
    }

    fn entry_size(packet: &QueuedPacket<P>) -> usize {
        let payload = match packet {
            QueuedPacket::Flush => 0,
            QueuedPacket::Unit(unit) => unit.size,
        };
        payload + mem::size_of::<Entry<P>>()
    }

    fn put_locked(&self, contents: &mut Contents<P>, packet: QueuedPacket<P>) -> bool {
        if self.abort.is_aborted() {
            return false;
        }
        let serial = match packet {
            QueuedPacket::Flush => self.serial.bump(),
            QueuedPacket::Unit(_) => self.serial.get(),
        };
        let size = Self::entry_size(&packet);
        if let QueuedPacket::Unit(unit) = &packet {
            contents.stats.duration += unit.duration;
        }
        contents.stats.nb_packets += 1;
        contents.stats.size += size;
        contents.entries.push_back(Entry {
            packet,
            serial,
            size,
        });
        self.cond.notify_one();
        true
    }

    /// Queues a unit. Returns false (and drops the unit) if the queue is aborted.
    pub fn put(&self, unit: CompressedUnit<P>) -> bool {
        let mut contents = self.contents.lock();
        self.put_locked(&mut contents, QueuedPacket::Unit(unit))
    }

    /// Queues the end-of-stream sentinel for `stream_index`.
    pub fn put_sentinel(&self, stream_index: usize) -> bool {
        self.put(CompressedUnit::sentinel(stream_index))
    }

    /// Queues a flush marker, starting a new epoch.
    pub fn put_flush(&self) -> bool {
        let mut contents = self.contents.lock();
        self.put_locked(&mut contents, QueuedPacket::Flush)
    }

    /// Takes the oldest item.
    ///
    /// With `block`, waits until an item arrives or the queue is aborted.
    pub fn get(&self, block: bool) -> Dequeued<P> {
        let mut contents = self.contents.lock();
        loop {
            if self.abort.is_aborted() {
                return Dequeued::Aborted;
            }
            if let Some(entry) = contents.entries.pop_front() {
                contents.stats.nb_packets -= 1;
                contents.stats.size -= entry.size;
                if let QueuedPacket::Unit(unit) = &entry.packet {
                    contents.stats.duration -= unit.duration;
                }
                return Dequeued::Packet {
                    packet: entry.packet,
                    serial: entry.serial,
                };
            }
            if !block {
                return Dequeued::Empty;
            }
            self.cond.wait(&mut contents);
        }
    }

    /// Drops every queued item. The abort flag and serial are untouched.
    pub fn flush(&self) {
        let mut contents = self.contents.lock();
        contents.entries.clear();
        contents.stats = QueueStats::default();
    }

    /// Clears the abort flag and queues a flush marker to open a fresh epoch.
    pub fn start(&self) {
        let mut contents = self.contents.lock();
        self.abort.set(false);
        self.put_locked(&mut contents, QueuedPacket::Flush);
    }

    /// Raises the abort flag and wakes every waiter.
    pub fn abort(&self) {
        let _contents = self.contents.lock();
        self.abort.set(true);
        self.cond.notify_all();
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.contents.lock().stats
    }

    #[must_use]
    pub fn nb_packets(&self) -> usize {
        self.contents.lock().stats.nb_packets
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.contents.lock().stats.size
    }

    #[must_use]
    pub fn duration(&self) -> i64 {
        self.contents.lock().stats.duration
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Current epoch.
    #[must_use]
    pub fn serial(&self) -> i64 {
        self.serial.get()
    }

    /// Shared handle to this queue's epoch counter.
    #[must_use]
    pub fn serial_handle(&self) -> Serial {
        self.serial.clone()
    }

    /// Shared handle to this queue's abort flag.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}
