// SPDX-License-Identifier: MPL-2.0
//! Session configuration, loaded from and saved to a `settings.toml` file.
//!
//! Everything a playback session can be tuned with lives in one
//! [`SessionConfig`] value that is handed to the session at open time.
//! Settings that change during playback (volume, mute, pause, framedrop)
//! are then owned by the session and mutated through its setters.
//!
//! # Configuration Sections
//!
//! - `[playback]` - Sync master, frame dropping, loop/range, seeking
//! - `[audio]` - Startup volume and mute
//! - `[streams]` - Stream enable flags and explicit stream selection
//!
//! # Path Resolution
//!
//! 1. Use `load_from_path()`/`save_to_path()` with an explicit path
//! 2. Set the `LENS_PLAYER_CONFIG_DIR` environment variable
//! 3. Falls back to the platform-specific config directory
//!
//! # Examples
//!
//! ```no_run
//! use lens_player::config::{self, SyncMode};
//!
//! let (mut config, _warning) = config::load();
//! config.playback.sync = SyncMode::External;
//! config::save(&config).expect("Failed to save config");
//! ```

pub mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "settings.toml";
const APP_NAME: &str = "LensPlayer";

/// Environment variable to override the config directory.
pub const ENV_CONFIG_DIR: &str = "LENS_PLAYER_CONFIG_DIR";

// =============================================================================
// Enums (shared between sections)
// =============================================================================

/// Which clock the other timelines are corrected toward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    #[default]
    Audio,
    Video,
    External,
}

impl std::str::FromStr for SyncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "audio" => Ok(SyncMode::Audio),
            "video" => Ok(SyncMode::Video),
            "ext" | "external" => Ok(SyncMode::External),
            other => Err(Error::Config(format!("invalid sync mode: {}", other))),
        }
    }
}

/// When late video frames may be dropped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FrameDropMode {
    /// Drop only when video is not the master clock.
    #[default]
    Auto,
    Always,
    Never,
}

/// Which decoder timestamp becomes a video frame's presentation time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReorderPolicy {
    /// Best-effort timestamp guessed by the decoder.
    #[default]
    Auto,
    /// Decode timestamp of the packet that produced the frame.
    Dts,
    /// Presentation timestamp reported by the codec.
    Pts,
}

// =============================================================================
// Section Structs
// =============================================================================

/// Playback timing and navigation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub sync: SyncMode,

    pub framedrop: FrameDropMode,

    /// Number of times to play the media; 0 loops forever.
    pub loop_count: u32,

    /// Exit once playback completes instead of idling on the last frame.
    pub autoexit: bool,

    /// Start position in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,

    /// Amount of media to play, in seconds from `start_time`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// Seek by byte offset; `None` picks automatically from the container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seek_by_bytes: Option<bool>,

    /// Keyboard seek step in seconds (left/right arrows).
    pub seek_interval: f64,

    /// Disable reader backpressure; `None` enables it for realtime sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infinite_buffer: Option<bool>,

    pub decoder_reorder: ReorderPolicy,

    /// Periodically log a status line.
    pub show_status: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sync: SyncMode::default(),
            framedrop: FrameDropMode::default(),
            loop_count: 1,
            autoexit: false,
            start_time: None,
            duration: None,
            seek_by_bytes: None,
            seek_interval: DEFAULT_SEEK_INTERVAL_SECS,
            infinite_buffer: None,
            decoder_reorder: ReorderPolicy::default(),
            show_status: true,
        }
    }
}

/// Audio output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Startup volume in percent (0 to 100).
    pub volume: u8,

    pub muted: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            volume: DEFAULT_VOLUME_PERCENT,
            muted: false,
        }
    }
}

/// Stream selection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StreamsConfig {
    pub video_disable: bool,
    pub audio_disable: bool,
    pub subtitle_disable: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub wanted_video: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub wanted_audio: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub wanted_subtitle: Option<usize>,
}

// =============================================================================
// Main Config Struct (Sectioned)
// =============================================================================

/// Complete configuration of one playback session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub streams: StreamsConfig,
}

// =============================================================================
// Config Path Resolution
// =============================================================================

/// Returns the config directory, honoring an explicit override then the environment.
pub fn config_dir_with_override(override_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        return Some(path);
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_DIR) {
        if !env_path.is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }

    dirs::config_dir().map(|mut path| {
        path.push(APP_NAME);
        path
    })
}

fn config_path_with_override(base_dir: Option<PathBuf>) -> Option<PathBuf> {
    config_dir_with_override(base_dir).map(|mut path| {
        path.push(CONFIG_FILE);
        path
    })
}

// =============================================================================
// Load Functions
// =============================================================================

/// Loads the configuration from the default path.
///
/// Returns a tuple of (config, optional_warning). If loading fails, returns
/// the default config with a warning explaining what went wrong.
pub fn load() -> (SessionConfig, Option<String>) {
    load_with_override(None)
}

/// Loads the configuration from a custom directory.
pub fn load_with_override(base_dir: Option<PathBuf>) -> (SessionConfig, Option<String>) {
    if let Some(path) = config_path_with_override(base_dir) {
        if path.exists() {
            match load_from_path(&path) {
                Ok(config) => return (config, None),
                Err(e) => {
                    return (
                        SessionConfig::default(),
                        Some(format!("ignoring {}: {}", path.display(), e)),
                    );
                }
            }
        }
    }
    (SessionConfig::default(), None)
}

/// Loads configuration from a specific path.
pub fn load_from_path(path: &Path) -> Result<SessionConfig> {
    let content = fs::read_to_string(path)?;
    let config: SessionConfig = toml::from_str(&content)?;
    Ok(config)
}

// =============================================================================
// Save Functions
// =============================================================================

/// Saves the configuration to the default path.
pub fn save(config: &SessionConfig) -> Result<()> {
    save_with_override(config, None)
}

/// Saves the configuration to a custom directory.
pub fn save_with_override(config: &SessionConfig, base_dir: Option<PathBuf>) -> Result<()> {
    if let Some(path) = config_path_with_override(base_dir) {
        return save_to_path(config, &path);
    }
    Ok(())
}

/// Saves configuration to a specific path.
pub fn save_to_path(config: &SessionConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config).map_err(Error::from)?;
    fs::write(path, content)?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
