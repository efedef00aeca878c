// SPDX-License-Identifier: MPL-2.0
//! Centralized default values for all playback constants.
//!
//! This module serves as the single source of truth for the tuning values
//! used across the player. Constants are organized by category.
//!
//! # Categories
//!
//! - **Buffering**: reader backpressure ceilings and frame queue capacities
//! - **Sync**: A/V sync thresholds and external clock speed nudging
//! - **Audio**: sample correction and output buffer sizing
//! - **Volume**: mixer scale and per-key step
//! - **Navigation**: keyboard seek steps and pointer timing

// ==========================================================================
// Buffering Defaults
// ==========================================================================

/// Total buffered bytes across all packet queues above which the reader pauses.
pub const MAX_QUEUE_SIZE: usize = 15 * 1024 * 1024;

/// Packet count above which a stream is considered to have enough buffered.
pub const MIN_FRAMES: usize = 25;

/// Buffered duration (seconds) above which a stream has enough, when known.
pub const ENOUGH_QUEUE_DURATION_SECS: f64 = 1.0;

/// Bounded wait used by the reader when it cannot make progress.
pub const READ_RETRY_WAIT_MS: u64 = 10;

/// Decoded picture look-ahead.
pub const VIDEO_PICTURE_QUEUE_SIZE: usize = 3;

/// Decoded subtitle look-ahead.
pub const SUBPICTURE_QUEUE_SIZE: usize = 16;

/// Decoded audio block look-ahead.
pub const SAMPLE_QUEUE_SIZE: usize = 9;

/// Upper bound for any frame queue capacity.
pub const FRAME_QUEUE_SIZE: usize = max_usize(
    SAMPLE_QUEUE_SIZE,
    max_usize(VIDEO_PICTURE_QUEUE_SIZE, SUBPICTURE_QUEUE_SIZE),
);

const fn max_usize(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

// ==========================================================================
// Sync Defaults
// ==========================================================================

/// No A/V correction is attempted below this threshold (seconds).
pub const AV_SYNC_THRESHOLD_MIN: f64 = 0.04;

/// A/V correction is always attempted above this threshold (seconds).
pub const AV_SYNC_THRESHOLD_MAX: f64 = 0.1;

/// Frames longer than this are duplicated instead of delayed.
pub const AV_SYNC_FRAMEDUP_THRESHOLD: f64 = 0.1;

/// Clock differences above this (seconds) are treated as discontinuities.
pub const AV_NOSYNC_THRESHOLD: f64 = 10.0;

/// Refresh period of the presentation loop (seconds).
pub const REFRESH_RATE: f64 = 0.01;

/// Plausible frame duration ceiling for containers with timestamp discontinuities.
pub const MAX_FRAME_DURATION_DISCONTINUOUS: f64 = 10.0;

/// Plausible frame duration ceiling for everything else.
pub const MAX_FRAME_DURATION: f64 = 3600.0;

/// Low-water packet count for external clock slowdown.
pub const EXTERNAL_CLOCK_MIN_FRAMES: usize = 2;

/// High-water packet count for external clock speedup.
pub const EXTERNAL_CLOCK_MAX_FRAMES: usize = 10;

/// External clock speed floor.
pub const EXTERNAL_CLOCK_SPEED_MIN: f64 = 0.900;

/// External clock speed ceiling.
pub const EXTERNAL_CLOCK_SPEED_MAX: f64 = 1.010;

/// External clock speed adjustment per tick.
pub const EXTERNAL_CLOCK_SPEED_STEP: f64 = 0.001;

// ==========================================================================
// Audio Defaults
// ==========================================================================

/// Number of measurements the audio corrector needs before acting.
pub const AUDIO_DIFF_AVG_NB: u32 = 20;

/// Maximum audio speed change to correct sync, in percent of the block.
pub const SAMPLE_CORRECTION_PERCENT_MAX: usize = 10;

/// Smallest output buffer requested from the audio device, in sample frames.
pub const AUDIO_MIN_BUFFER_SIZE: u32 = 512;

/// Upper bound on audio callbacks per second, used to size the device buffer.
pub const AUDIO_MAX_CALLBACKS_PER_SEC: u32 = 30;

// ==========================================================================
// Volume Defaults
// ==========================================================================

/// Top of the mixer volume scale.
pub const MIX_MAX_VOLUME: u8 = 128;

/// Startup volume as a percentage of [`MIX_MAX_VOLUME`].
pub const DEFAULT_VOLUME_PERCENT: u8 = 100;

/// Volume change per key press, in decibels.
pub const VOLUME_STEP_DB: f64 = 0.75;

// ==========================================================================
// Navigation Defaults
// ==========================================================================

/// Left/right arrow seek distance (seconds).
pub const DEFAULT_SEEK_INTERVAL_SECS: f64 = 10.0;

/// Up/down arrow seek distance (seconds).
pub const LONG_SEEK_SECS: f64 = 60.0;

/// Page up/down seek distance when the media has no chapters (seconds).
pub const PAGE_SEEK_SECS: f64 = 600.0;

/// Assumed byte rate for byte-based seeking when the bit rate is unknown.
pub const FALLBACK_BYTES_PER_SEC: f64 = 180_000.0;

/// Two clicks closer than this toggle fullscreen.
pub const DOUBLE_CLICK_SECS: f64 = 0.5;

/// Minimum wall time between two status lines.
pub const STATUS_INTERVAL_SECS: f64 = 0.03;

// ==========================================================================
// Compile-time Validation
// ==========================================================================

const _: () = {
    // Buffering validation
    assert!(MIN_FRAMES > EXTERNAL_CLOCK_MAX_FRAMES);
    assert!(VIDEO_PICTURE_QUEUE_SIZE > 1);
    assert!(SAMPLE_QUEUE_SIZE > 1);
    assert!(FRAME_QUEUE_SIZE >= SUBPICTURE_QUEUE_SIZE);

    // Sync validation
    assert!(AV_SYNC_THRESHOLD_MIN < AV_SYNC_THRESHOLD_MAX);
    assert!(AV_NOSYNC_THRESHOLD > AV_SYNC_THRESHOLD_MAX);
    assert!(MAX_FRAME_DURATION_DISCONTINUOUS < MAX_FRAME_DURATION);
    assert!(EXTERNAL_CLOCK_MIN_FRAMES < EXTERNAL_CLOCK_MAX_FRAMES);
    assert!(EXTERNAL_CLOCK_SPEED_MIN < 1.0);
    assert!(EXTERNAL_CLOCK_SPEED_MAX > 1.0);
    assert!(EXTERNAL_CLOCK_SPEED_STEP > 0.0);

    // Audio validation
    assert!(AUDIO_DIFF_AVG_NB > 0);
    assert!(SAMPLE_CORRECTION_PERCENT_MAX < 100);

    // Volume validation
    assert!(DEFAULT_VOLUME_PERCENT <= 100);
    assert!(VOLUME_STEP_DB > 0.0);
};
