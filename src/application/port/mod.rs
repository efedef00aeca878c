// SPDX-License-Identifier: MPL-2.0
//! Port definitions (traits) for dependency inversion.
//!
//! This module defines the collaborator interfaces the playback core drives.
//! Infrastructure adapters implement them; tests implement them in memory.
//!
//! # Available Ports
//!
//! - [`demux`]: Source opening, demultiplexing and codec construction
//! - [`codec`]: Audio/video/subtitle decoding
//! - [`audio`]: Audio output device and resampling
//! - [`render`]: Picture conversion and presentation
//!
//! # Design Notes
//!
//! - Traits use crate types only (no `FFmpeg` or `cpal` handles)
//! - Decoders are `Send`: each one moves to its decoder thread once
//! - Display ports stay on the presentation thread and need not be `Send`

pub mod audio;
pub mod codec;
pub mod demux;
pub mod render;

pub use audio::{AudioCallback, AudioDevice, AudioSpec, Resampler};
pub use codec::{
    CodecDecoder, OverlayRect, RawFrame, ReceiveStatus, SubmitStatus, SubtitleDecoder,
    SubtitleOverlay,
};
pub use demux::{
    Chapter, CodecFactory, Demuxer, MediaBackend, MediaInfo, MediaType, ReadOutcome,
    SeekRequest, StreamInfo,
};
pub use render::{ImageConverter, PixelBuffer, Renderer};
