//! Common types and utilities shared across the land-cover reconciliation workspace.
//!
//! Everything that more than one stage of the pipeline needs to agree on lives
//! here: bounding boxes, coordinate reference identifiers, the affine grid
//! geometry, and the block-window contracts used to stream rasters through
//! bounded memory.

pub mod bbox;
pub mod crs;
pub mod error;
pub mod grid;
pub mod majority;
pub mod raster;

pub use bbox::BoundingBox;
pub use crs::Crs;
pub use error::{RasterError, RasterResult};
pub use grid::{GeoTransform, GridGeometry, PixelType, RasterGrid};
pub use majority::MajorityCounter;
pub use raster::{
    block_windows, collect_blocks, BlockProducer, BlockWindow, MemoryRaster, RasterSource,
    SourceBlocks,
};

/// No-data sentinel for categorical `i16` outputs.
pub const CODE_NODATA: i16 = -9999;

/// No-data value for `f32` confidence outputs.
pub const CONFIDENCE_NODATA: f32 = 0.0;
