// SPDX-License-Identifier: MPL-2.0
//! Application layer - collaborator contracts.
//!
//! - [`port`]: Trait definitions (interfaces) for dependency inversion
//!
//! # Dependency Rule
//!
//! - The playback core (`player`) drives ports and never names a backend
//! - Infrastructure implements ports (`infrastructure::ffmpeg`, `player::audio_output`)
//! - The binary wires a backend into a session

pub mod port;
