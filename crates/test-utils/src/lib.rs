//! Shared test utilities for the land-cover reconciliation workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Categorical grid generators with predictable class layouts
//! - Fixtures for class codes, reference lattices and small scenarios
//! - Approximate comparison macros
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, create_patch_grid};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

use std::path::PathBuf;

/// Create a scratch directory that is removed when the guard drops.
///
/// Returns the guard together with its path for convenience.
pub fn scratch_dir() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create scratch directory");
    let path = dir.path().to_path_buf();
    (dir, path)
}

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Assert that two class-code buffers are identical, reporting the first
/// differing pixel as (row, col) instead of dumping both vectors.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_codes_eq;
///
/// assert_codes_eq!(&actual, &expected, width);
/// ```
#[macro_export]
macro_rules! assert_codes_eq {
    ($actual:expr, $expected:expr, $width:expr) => {{
        let actual = $actual;
        let expected = $expected;
        let width: usize = $width;
        assert_eq!(actual.len(), expected.len(), "buffer lengths differ");
        if let Some(i) = actual.iter().zip(expected.iter()).position(|(a, e)| a != e) {
            panic!(
                "codes differ at (row {}, col {}): actual `{:?}`, expected `{:?}`",
                i / width,
                i % width,
                actual[i],
                expected[i]
            );
        }
    }};
}
