//! Block windows and the streaming contracts between pipeline stages.
//!
//! Large rasters never live in memory whole. A stage asks its upstream for
//! one [`BlockWindow`] at a time, so peak memory is bounded by the block size
//! plus whatever halo the stage needs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RasterError, RasterResult};
use crate::grid::RasterGrid;

/// A rectangular pixel window within a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockWindow {
    pub row_off: usize,
    pub col_off: usize,
    pub rows: usize,
    pub cols: usize,
}

impl BlockWindow {
    pub fn new(row_off: usize, col_off: usize, rows: usize, cols: usize) -> Self {
        Self {
            row_off,
            col_off,
            rows,
            cols,
        }
    }

    /// The window covering a whole `width` x `height` raster.
    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, height, width)
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn row_end(&self) -> usize {
        self.row_off + self.rows
    }

    pub fn col_end(&self) -> usize {
        self.col_off + self.cols
    }

    /// Grow the window by `halo` pixels on every side, clipped to the raster.
    pub fn expand(&self, halo: usize, width: usize, height: usize) -> BlockWindow {
        let row_off = self.row_off.saturating_sub(halo);
        let col_off = self.col_off.saturating_sub(halo);
        let row_end = (self.row_end() + halo).min(height);
        let col_end = (self.col_end() + halo).min(width);
        BlockWindow::new(row_off, col_off, row_end - row_off, col_end - col_off)
    }

    /// Check the window lies inside a `width` x `height` raster.
    pub fn check_within(&self, width: usize, height: usize) -> RasterResult<()> {
        if self.rows == 0 || self.cols == 0 || self.row_end() > height || self.col_end() > width {
            return Err(RasterError::WindowOutOfBounds {
                window: self.to_string(),
                width,
                height,
            });
        }
        Ok(())
    }
}

impl fmt::Display for BlockWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows {}..{} cols {}..{}",
            self.row_off,
            self.row_end(),
            self.col_off,
            self.col_end()
        )
    }
}

/// Tile a raster into windows of at most `block_rows` x `block_cols`,
/// in row-major order.
pub fn block_windows(
    width: usize,
    height: usize,
    block_rows: usize,
    block_cols: usize,
) -> Vec<BlockWindow> {
    let block_rows = block_rows.max(1);
    let block_cols = block_cols.max(1);
    let mut windows = Vec::new();
    let mut row = 0;
    while row < height {
        let rows = block_rows.min(height - row);
        let mut col = 0;
        while col < width {
            let cols = block_cols.min(width - col);
            windows.push(BlockWindow::new(row, col, rows, cols));
            col += cols;
        }
        row += rows;
    }
    windows
}

/// Random-access reader of integer class codes.
pub trait RasterSource {
    /// Description of the raster being read.
    fn grid(&self) -> &RasterGrid;

    /// Read a window as row-major `i32` codes.
    fn read_window(&mut self, window: &BlockWindow) -> RasterResult<Vec<i32>>;
}

impl<S: RasterSource + ?Sized> RasterSource for Box<S> {
    fn grid(&self) -> &RasterGrid {
        (**self).grid()
    }

    fn read_window(&mut self, window: &BlockWindow) -> RasterResult<Vec<i32>> {
        (**self).read_window(window)
    }
}

/// A pipeline stage that yields output pixels one window at a time.
pub trait BlockProducer<T> {
    fn produce(&mut self, window: &BlockWindow) -> RasterResult<Vec<T>>;
}

impl<T, P: BlockProducer<T> + ?Sized> BlockProducer<T> for Box<P> {
    fn produce(&mut self, window: &BlockWindow) -> RasterResult<Vec<T>> {
        (**self).produce(window)
    }
}

/// Adapts a [`RasterSource`] into a code producer, so the same stages can
/// sit on top of a file reader or a warp.
pub struct SourceBlocks<S>(pub S);

impl<S: RasterSource> SourceBlocks<S> {
    pub fn into_inner(self) -> S {
        self.0
    }
}

impl<S: RasterSource> BlockProducer<i32> for SourceBlocks<S> {
    fn produce(&mut self, window: &BlockWindow) -> RasterResult<Vec<i32>> {
        self.0.read_window(window)
    }
}

/// Drain a producer into one row-major buffer using full-width strips.
pub fn collect_blocks<T, P>(
    producer: &mut P,
    width: usize,
    height: usize,
    block_rows: usize,
) -> RasterResult<Vec<T>>
where
    P: BlockProducer<T> + ?Sized,
{
    let mut out = Vec::with_capacity(width * height);
    for window in block_windows(width, height, block_rows, width) {
        let block = producer.produce(&window)?;
        RasterError::check_len(window.pixel_count(), block.len())?;
        out.extend(block);
    }
    Ok(out)
}

/// A raster held entirely in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRaster<T> {
    grid: RasterGrid,
    data: Vec<T>,
}

impl<T: Copy> MemoryRaster<T> {
    pub fn new(grid: RasterGrid, data: Vec<T>) -> RasterResult<Self> {
        RasterError::check_len(grid.geometry.pixel_count(), data.len())?;
        Ok(Self { grid, data })
    }

    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_parts(self) -> (RasterGrid, Vec<T>) {
        (self.grid, self.data)
    }

    /// Copy a window out of the buffer.
    pub fn window(&self, window: &BlockWindow) -> RasterResult<Vec<T>> {
        let width = self.grid.width();
        window.check_within(width, self.grid.height())?;
        let mut out = Vec::with_capacity(window.pixel_count());
        for row in window.row_off..window.row_end() {
            let start = row * width + window.col_off;
            out.extend_from_slice(&self.data[start..start + window.cols]);
        }
        Ok(out)
    }
}

impl<T: Copy + Into<i32>> RasterSource for MemoryRaster<T> {
    fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    fn read_window(&mut self, window: &BlockWindow) -> RasterResult<Vec<i32>> {
        Ok(self.window(window)?.into_iter().map(Into::into).collect())
    }
}

impl<T: Copy> BlockProducer<T> for MemoryRaster<T> {
    fn produce(&mut self, window: &BlockWindow) -> RasterResult<Vec<T>> {
        self.window(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::grid::{GeoTransform, GridGeometry, PixelType};

    fn grid(width: usize, height: usize) -> RasterGrid {
        let geometry = GridGeometry::new(
            width,
            height,
            GeoTransform::from_origin(0.0, height as f64, 1.0, 1.0),
            Crs::Epsg(5070),
        )
        .unwrap();
        RasterGrid::new(geometry, Some(-9999.0), PixelType::I16)
    }

    #[test]
    fn test_block_windows_cover_raster_once() {
        let windows = block_windows(10, 7, 3, 4);
        let covered: usize = windows.iter().map(|w| w.pixel_count()).sum();
        assert_eq!(covered, 70);
        assert_eq!(windows[0], BlockWindow::new(0, 0, 3, 4));
        assert_eq!(*windows.last().unwrap(), BlockWindow::new(6, 8, 1, 2));
    }

    #[test]
    fn test_expand_clips_to_raster() {
        let w = BlockWindow::new(0, 2, 2, 2).expand(1, 5, 3);
        assert_eq!(w, BlockWindow::new(0, 1, 3, 4));
    }

    #[test]
    fn test_memory_raster_window() {
        let data: Vec<i16> = (0..12).collect();
        let mut raster = MemoryRaster::new(grid(4, 3), data).unwrap();
        let codes = raster.read_window(&BlockWindow::new(1, 1, 2, 2)).unwrap();
        assert_eq!(codes, vec![5, 6, 9, 10]);
        assert!(raster.read_window(&BlockWindow::new(2, 0, 2, 4)).is_err());
    }

    #[test]
    fn test_collect_blocks_reassembles() {
        let data: Vec<i16> = (0..35).collect();
        let mut raster = MemoryRaster::new(grid(5, 7), data.clone()).unwrap();
        let out: Vec<i16> = collect_blocks(&mut raster, 5, 7, 2).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_memory_raster_rejects_wrong_length() {
        assert!(matches!(
            MemoryRaster::new(grid(2, 2), vec![1i16; 3]),
            Err(RasterError::BufferSizeMismatch { expected: 4, actual: 3 })
        ));
    }
}
