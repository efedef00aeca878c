// SPDX-License-Identifier: MPL-2.0
//! Events delivered to the presentation loop.
//!
//! Worker threads never tear down state they do not own. Session-fatal
//! conditions travel as [`PlayerEvent::Terminated`] on an unbounded channel
//! and the presentation loop performs the orderly close.

use tokio::sync::mpsc;

/// User intents, already decoded from raw key or mouse input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerAction {
    Quit,
    ToggleFullscreen,
    TogglePause,
    ToggleMute,
    VolumeUp,
    VolumeDown,
    StepFrame,
    CycleAudio,
    CycleVideo,
    CycleSubtitle,
    /// Cycles all three stream kinds (next program).
    CycleProgram,
    /// Relative seek in seconds.
    Seek(f64),
    /// Next (`1`) or previous (`-1`) chapter; falls back to a long seek without chapters.
    Chapter(i32),
    /// Absolute seek to a fraction of the media, `0.0..=1.0`.
    SeekFraction(f64),
    /// Window exposed or resized: redraw the last frame.
    Refresh,
}

/// Why a session stopped on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The user asked to quit.
    Quit,
    /// All streams finished and neither looping nor idling was requested.
    EndOfPlayback,
    /// The demuxer reported a hard I/O error.
    ReadError(String),
    /// A terminating signal was received.
    Interrupted,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quit => f.write_str("quit"),
            Self::EndOfPlayback => f.write_str("end of playback"),
            Self::ReadError(message) => write!(f, "read error: {message}"),
            Self::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// Everything the presentation loop reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Action(PlayerAction),
    Terminated { reason: TerminationReason },
}

pub type EventSender = mpsc::UnboundedSender<PlayerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PlayerEvent>;

/// Creates the session event channel.
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
