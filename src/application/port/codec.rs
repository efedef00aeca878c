// SPDX-License-Identifier: MPL-2.0
//! Codec port definitions.
//!
//! Decoders follow the send/receive model: [`CodecDecoder::submit`] feeds a
//! compressed unit and [`CodecDecoder::receive`] drains decoded output.
//! Submitting the end-of-stream sentinel (a unit without payload) asks the
//! decoder to flush its internal buffering, after which `receive` reports
//! [`ReceiveStatus::Drained`].

use crate::error::Result;
use crate::player::packet_queue::CompressedUnit;

/// Outcome of [`CodecDecoder::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Accepted,
    /// Output must be drained before more input is accepted.
    Busy,
}

/// Outcome of [`CodecDecoder::receive`].
#[derive(Debug)]
pub enum ReceiveStatus<T> {
    Frame(RawFrame<T>),
    /// More input is needed.
    Again,
    /// The decoder is fully drained after a sentinel.
    Drained,
}

/// A decoded frame with the raw timestamps reported by the codec.
///
/// Timestamps are in the stream time base; subtitle `pts` is in microseconds.
#[derive(Debug)]
pub struct RawFrame<T> {
    pub payload: T,
    pub pts: Option<i64>,
    pub best_effort_timestamp: Option<i64>,
    pub pkt_dts: Option<i64>,
    /// Byte position of the packet this frame came from.
    pub pos: Option<i64>,
    /// Samples per channel (audio).
    pub nb_samples: usize,
    /// Sample rate in Hz (audio).
    pub sample_rate: u32,
}

impl<T> RawFrame<T> {
    /// Creates a frame with no timestamps.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            pts: None,
            best_effort_timestamp: None,
            pkt_dts: None,
            pos: None,
            nb_samples: 0,
            sample_rate: 0,
        }
    }
}

/// Port for audio and video decoding.
pub trait CodecDecoder<P, T>: Send {
    /// Submits a unit; a sentinel starts draining.
    ///
    /// # Errors
    ///
    /// Returns an error for corrupt input; the unit is then skipped.
    fn submit(&mut self, unit: &CompressedUnit<P>) -> Result<SubmitStatus>;

    /// Pulls one decoded frame.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding the pending input failed.
    fn receive(&mut self) -> Result<ReceiveStatus<T>>;

    /// Discards all internal state so decoding can restart at a new position.
    fn flush(&mut self);
}

/// One RGBA bitmap of a subtitle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// A decoded subtitle, ready for overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleOverlay {
    /// Display window start, seconds relative to the subtitle pts.
    pub start_display: f64,
    /// Display window end, seconds relative to the subtitle pts.
    pub end_display: f64,
    /// Only bitmap subtitles are rendered.
    pub bitmap: bool,
    pub rects: Vec<OverlayRect>,
    /// Coordinate space of `rects`.
    pub width: u32,
    pub height: u32,
}

/// Port for subtitle decoding: zero or one subtitle per unit.
///
/// Backends produce [`SubtitleOverlay`] payloads; the output type is a
/// parameter so the decoder harness can stay generic over it.
pub trait SubtitleDecoder<P, S = SubtitleOverlay>: Send {
    /// # Errors
    ///
    /// Returns an error for corrupt input; the unit is then skipped.
    fn decode(&mut self, unit: &CompressedUnit<P>) -> Result<Option<RawFrame<S>>>;

    fn flush(&mut self);
}
