// SPDX-License-Identifier: MPL-2.0
//! `lens_player` is the synchronization and pipelining core of a small media player.
//!
//! A reader thread demultiplexes the source into per-stream packet queues,
//! decoder threads fill frame queues, the audio device pulls samples through
//! a callback and the presentation loop shows each picture when the master
//! clock says it is due.

#![doc(html_root_url = "https://docs.rs/lens_player/0.1.0")]

pub mod application;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod player;

#[cfg(test)]
mod test_utils;
