//! Coordinate reference system handling for categorical rasters.
//!
//! Transform mathematics is delegated to `proj4rs`; this crate decides
//! *which* definitions to use and how grids line up:
//!
//! ```text
//!   Crs ──► CrsRegistry / WKT reader ──► ResolvedCrs
//!                                          │
//!   source GridGeometry ──────────────► CoordinateTransformer
//!                                          │
//!   GridAlignmentSpec ──► GridAligner ──► target GridGeometry
//!                                          │
//!   RasterSource ─────────────────────► WarpStage (nearest / mode)
//! ```
//!
//! Resampling is restricted to [`CategoricalResampling`]; class codes are
//! never averaged.

pub mod alignment;
pub mod error;
pub mod registry;
pub mod transformer;
pub mod warp;
pub mod wkt;

pub use alignment::{AlignedGrid, AlignmentCheck, GridAligner, GridAlignmentSpec};
pub use error::{ProjectionError, Result};
pub use registry::{CrsRegistry, ResolutionSource, ResolvedCrs, CONUS_ALBERS_PROJ, CONUS_ALBERS_WKT};
pub use transformer::CoordinateTransformer;
pub use warp::{CategoricalResampling, Reprojector, ReprojectorConfig, WarpStage};
