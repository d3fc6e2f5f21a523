//! Test data generators for creating synthetic categorical rasters.
//!
//! These generators create predictable, verifiable class layouts that can be
//! used across the test suite. Buffers are row-major (row 0 first).

use crate::fixtures::esri;

/// Creates a grid of square patches cycling through `codes`.
///
/// Patch `(pr, pc)` takes `codes[(pr + pc) % codes.len()]`, so neighbouring
/// patches always differ when more than one code is given.
///
/// # Example
///
/// ```
/// use test_utils::create_patch_grid;
///
/// let grid = create_patch_grid(4, 2, 2, &[1, 2]);
/// assert_eq!(grid, vec![1, 1, 2, 2, 1, 1, 2, 2]);
/// ```
pub fn create_patch_grid(width: usize, height: usize, patch: usize, codes: &[i32]) -> Vec<i32> {
    let patch = patch.max(1);
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let idx = (row / patch + col / patch) % codes.len();
            data.push(codes[idx]);
        }
    }
    data
}

/// Creates a source scene using every ESRI land-cover code.
///
/// Patches are 4 pixels wide, which keeps all nine codes present on any
/// grid of at least 12 x 12 pixels.
pub fn create_esri_scene(width: usize, height: usize) -> Vec<i32> {
    create_patch_grid(width, height, 4, &esri::ALL_CODES)
}

/// Creates a grid filled with a single code.
pub fn create_constant_codes(width: usize, height: usize, code: i32) -> Vec<i32> {
    vec![code; width * height]
}

/// Punches sentinel holes into a grid at every `every`-th pixel.
///
/// Returns the indices that were overwritten.
pub fn punch_holes<T: Copy>(data: &mut [T], every: usize, sentinel: T) -> Vec<usize> {
    let every = every.max(1);
    let mut holes = Vec::new();
    for i in (every / 2..data.len()).step_by(every) {
        data[i] = sentinel;
        holes.push(i);
    }
    holes
}

/// Narrows an `i32` code buffer to `i16`.
///
/// Panics if a value does not fit; test inputs are expected to be in range.
pub fn to_i16_codes(data: &[i32]) -> Vec<i16> {
    data.iter()
        .map(|&v| i16::try_from(v).expect("code out of i16 range"))
        .collect()
}
