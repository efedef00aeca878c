// SPDX-License-Identifier: MPL-2.0
//! Shared helpers for unit tests.

pub use approx::assert_abs_diff_eq;

/// Tolerance for values derived from timestamps by pure arithmetic.
pub const TIMESTAMP_EPSILON: f64 = 1e-9;

/// Tolerance for readings that depend on the wall clock between two calls.
pub const WALL_CLOCK_EPSILON: f64 = 1e-3;
