// SPDX-License-Identifier: MPL-2.0
//! Playback core.
//!
//! Compressed units flow from the reader thread through per-stream packet
//! queues into decoder threads, then through frame queues to the audio
//! callback and the presentation loop. Clocks tie the two consumers together.

pub mod audio;
#[cfg(feature = "audio-output")]
pub mod audio_output;
pub mod audio_sync;
pub mod clock;
pub mod controls;
pub mod decoder;
pub mod event;
pub mod frame_queue;
pub mod packet_queue;
pub mod presenter;
pub mod reader;
pub mod serial;
pub mod session;
pub mod sync;
pub mod time_units;
pub mod volume;

pub use audio::{AudioBlock, AudioPipeline};
#[cfg(feature = "audio-output")]
pub use audio_output::CpalOutput;
pub use audio_sync::AudioSyncCorrector;
pub use clock::Clock;
pub use controls::PlaybackControls;
pub use decoder::{DecoderHarness, StreamKind};
pub use event::{PlayerAction, PlayerEvent, TerminationReason};
pub use frame_queue::{Frame, FrameInfo, FrameQueue};
pub use packet_queue::{CompressedUnit, PacketQueue};
pub use presenter::{action_for_key, HeadlessRenderer, Key, MouseButton, PointerMapper, Presenter};
pub use reader::{ReaderControl, ReaderLoop};
pub use serial::{AbortHandle, Serial};
pub use session::{Session, SessionStats};
pub use sync::{Clocks, SyncScheduler};
pub use volume::Volume;
