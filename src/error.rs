// SPDX-License-Identifier: MPL-2.0
use std::fmt;

#[derive(Debug, Clone)]
pub enum Error {
    Io(String),
    Config(String),
    /// Fatal failure while opening a source or setting up a session.
    Open(String),
    Decode(String),
    Audio(AudioError),
    Unsupported(String),
}

/// Audio output failures, reported by the output backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    /// No output device is available on this host.
    NoDevice,

    /// The device rejected every format of the fallback ladder.
    NoSupportedConfig { channels: u16, sample_rate: u32 },

    /// The device accepted the format but the stream could not be built or started.
    Stream(String),
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::NoDevice => write!(f, "No audio output device found"),
            AudioError::NoSupportedConfig {
                channels,
                sample_rate,
            } => write!(
                f,
                "No supported audio configuration (last tried {} channels @ {} Hz)",
                channels, sample_rate
            ),
            AudioError::Stream(msg) => write!(f, "Audio stream failure: {}", msg),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O Error: {}", e),
            Error::Config(e) => write!(f, "Config Error: {}", e),
            Error::Open(e) => write!(f, "Open Error: {}", e),
            Error::Decode(e) => write!(f, "Decode Error: {}", e),
            Error::Audio(e) => write!(f, "Audio Error: {}", e),
            Error::Unsupported(e) => write!(f, "Unsupported: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<AudioError> for Error {
    fn from(err: AudioError) -> Self {
        Error::Audio(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for Error {
    fn from(err: ffmpeg_next::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
