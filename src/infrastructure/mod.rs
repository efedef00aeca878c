// SPDX-License-Identifier: MPL-2.0
//! Infrastructure layer adapters.
//!
//! This module contains concrete implementations of the port traits defined in
//! `application::port`.
//!
//! # Available Adapters
//!
//! - [`ffmpeg`]: Demuxing, decoding, resampling and scaling via `FFmpeg`
//!   (implements [`MediaBackend`])
//!
//! The cpal audio output lives next to the audio pipeline in
//! `player::audio_output`.
//!
//! [`MediaBackend`]: crate::application::port::MediaBackend

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegBackend;
