//! Bounded sampling of the distinct codes in a raster.

use std::collections::BTreeSet;

use landcover_common::{block_windows, RasterResult, RasterSource};
use tracing::debug;

/// Collect the distinct codes seen in at most about `max_samples` pixels.
///
/// Small rasters are scanned fully. Larger ones are read in full-width
/// strips of `block_rows` rows and every `stride`-th pixel (counted across
/// the whole raster) is kept. The stride is coprime with the width so the
/// samples walk through every column. No-data is never reported.
pub fn sample_distinct_codes<S: RasterSource + ?Sized>(
    source: &mut S,
    max_samples: usize,
    block_rows: usize,
) -> RasterResult<BTreeSet<i32>> {
    let (width, height) = (source.grid().width(), source.grid().height());
    let nodata = source.grid().nodata_code();
    let total = width * height;
    let mut stride = total.div_ceil(max_samples.max(1)).max(1);
    while stride > 1 && gcd(stride, width) != 1 {
        stride += 1;
    }

    let mut codes = BTreeSet::new();
    let mut inspected = 0usize;
    for window in block_windows(width, height, block_rows, width) {
        let block = source.read_window(&window)?;
        let base = window.row_off * width;
        // First index in this block that lands on the stride.
        let first = (stride - base % stride) % stride;
        for &code in block.iter().skip(first).step_by(stride) {
            inspected += 1;
            if Some(code) != nodata {
                codes.insert(code);
            }
        }
    }

    debug!(
        pixels = total,
        stride,
        inspected,
        distinct = codes.len(),
        "Sampled distinct codes"
    );
    Ok(codes)
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
