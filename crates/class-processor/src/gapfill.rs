//! Majority-vote gap filling.
//!
//! Each sentinel pixel takes the most frequent non-sentinel value in the
//! square window around it. Votes are always read from the unfilled input,
//! so the order pixels are visited in never changes the result. Ties go to
//! the value met first scanning the window row by row.

use landcover_common::{BlockProducer, BlockWindow, MajorityCounter, RasterError, RasterResult};
use tracing::debug;

use crate::error::{ProcessorError, Result};

/// Check a window size and return its radius.
pub fn window_radius(window: usize) -> Result<usize> {
    if window == 0 || window % 2 == 0 {
        return Err(ProcessorError::InvalidWindow(window));
    }
    Ok(window / 2)
}

/// Fill every `sentinel` pixel of a `width` x `height` buffer.
///
/// Non-sentinel pixels are copied unchanged. A buffer without sentinels is
/// returned as a plain copy.
pub fn fill(
    buffer: &[i16],
    width: usize,
    height: usize,
    sentinel: i16,
    window: usize,
) -> Result<Vec<i16>> {
    let radius = window_radius(window)?;
    ProcessorError::check_len(width * height, buffer.len())?;

    if !buffer.contains(&sentinel) {
        return Ok(buffer.to_vec());
    }

    let region = BlockWindow::full(width, height);
    let (out, filled) = fill_region(buffer, width, height, sentinel, radius, &region);
    debug!(width, height, window, filled, "Gap fill complete");
    Ok(out)
}

/// Fill the pixels of `region` (relative to `src`) using votes from all of
/// `src`. Returns the region's pixels and how many holes were closed.
fn fill_region(
    src: &[i16],
    cols: usize,
    rows: usize,
    sentinel: i16,
    radius: usize,
    region: &BlockWindow,
) -> (Vec<i16>, usize) {
    let mut out = Vec::with_capacity(region.pixel_count());
    let mut counter = MajorityCounter::with_capacity((2 * radius + 1).pow(2));
    let mut filled = 0;

    for row in region.row_off..region.row_end() {
        for col in region.col_off..region.col_end() {
            let value = src[row * cols + col];
            if value != sentinel {
                out.push(value);
                continue;
            }

            counter.clear();
            let r0 = row.saturating_sub(radius);
            let r1 = (row + radius + 1).min(rows);
            let c0 = col.saturating_sub(radius);
            let c1 = (col + radius + 1).min(cols);
            for r in r0..r1 {
                for &v in &src[r * cols + c0..r * cols + c1] {
                    if v != sentinel {
                        counter.push(v as i32);
                    }
                }
            }

            match counter.winner() {
                Some(w) => {
                    filled += 1;
                    out.push(w as i16);
                }
                None => out.push(sentinel),
            }
        }
    }
    (out, filled)
}

/// Streaming gap fill. Each window is read from upstream with a halo of
/// `window / 2` pixels so edge pixels see the same neighbours as a
/// whole-buffer fill.
pub struct GapFillStage<P> {
    upstream: P,
    width: usize,
    height: usize,
    sentinel: i16,
    radius: usize,
    filled: u64,
}

impl<P: BlockProducer<i16>> GapFillStage<P> {
    pub fn new(
        upstream: P,
        width: usize,
        height: usize,
        sentinel: i16,
        window: usize,
    ) -> Result<Self> {
        Ok(Self {
            upstream,
            width,
            height,
            sentinel,
            radius: window_radius(window)?,
            filled: 0,
        })
    }

    /// Holes closed so far.
    pub fn filled_count(&self) -> u64 {
        self.filled
    }

    pub fn upstream(&self) -> &P {
        &self.upstream
    }
}

impl<P: BlockProducer<i16>> BlockProducer<i16> for GapFillStage<P> {
    fn produce(&mut self, window: &BlockWindow) -> RasterResult<Vec<i16>> {
        window.check_within(self.width, self.height)?;
        let outer = window.expand(self.radius, self.width, self.height);
        let src = self.upstream.produce(&outer)?;
        RasterError::check_len(outer.pixel_count(), src.len())?;

        let inner = BlockWindow::new(
            window.row_off - outer.row_off,
            window.col_off - outer.col_off,
            window.rows,
            window.cols,
        );

        if !src.contains(&self.sentinel) {
            let mut out = Vec::with_capacity(inner.pixel_count());
            for row in inner.row_off..inner.row_end() {
                let start = row * outer.cols + inner.col_off;
                out.extend_from_slice(&src[start..start + inner.cols]);
            }
            return Ok(out);
        }

        let (out, filled) =
            fill_region(&src, outer.cols, outer.rows, self.sentinel, self.radius, &inner);
        self.filled += filled as u64;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: i16 = -9999;

    #[test]
    fn test_window_must_be_odd() {
        assert!(matches!(fill(&[1], 1, 1, S, 2), Err(ProcessorError::InvalidWindow(2))));
        assert!(matches!(fill(&[1], 1, 1, S, 0), Err(ProcessorError::InvalidWindow(0))));
        assert!(fill(&[1], 1, 1, S, 1).is_ok());
    }

    #[test]
    fn test_center_hole_tie_goes_to_first_seen() {
        let buffer = [98, 98, 183, 183, S, 183, 91, 91, 91];
        let out = fill(&buffer, 3, 3, S, 3).unwrap();
        assert_eq!(out[4], 183);
        assert_eq!(&out[..4], &buffer[..4]);
    }

    #[test]
    fn test_isolated_hole_stays() {
        let buffer = [S, S, S, S, S, S, S, S, 5];
        let out = fill(&buffer, 3, 3, S, 1).unwrap();
        assert_eq!(out, buffer.to_vec());
    }

    #[test]
    fn test_votes_come_from_original_buffer() {
        // The second hole must not see the first hole's fill.
        let buffer = [7, S, S, S];
        let out = fill(&buffer, 4, 1, S, 3).unwrap();
        assert_eq!(out, vec![7, 7, S, S]);
    }

    #[test]
    fn test_buffer_size_checked() {
        assert!(matches!(
            fill(&[1, 2, 3], 2, 2, S, 3),
            Err(ProcessorError::BufferSize { expected: 4, actual: 3 })
        ));
    }
}
