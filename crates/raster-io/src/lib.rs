//! Raster storage for the reconciliation pipeline.
//!
//! Everything storage-specific sits behind [`RasterBackend`]:
//!
//! - [`GeoTiffBackend`] reads and writes GeoTIFF files with the `tiff` crate,
//!   keeping georeferencing in the model and GeoKey tags.
//! - [`SimulatedBackend`] keeps rasters in memory and can inject CRS drift
//!   or removal failures for tests.

pub mod backend;
pub mod cache;
pub mod cleanup;
pub mod error;
pub mod geokeys;
pub mod geotiff;
pub mod simulated;

pub use backend::{
    footprint_bounds, ConversionReport, NarrowCodes, RasterBackend, RasterValidation, SourceHandle,
    SystemInfo, WriteReport, COARSE_RESOLUTION_M, LARGE_FILE_BYTES,
};
pub use cache::{CacheStats, ChunkCache};
pub use cleanup::{cleanup, remove_scratch_dir, CleanupReport};
pub use error::{BackendError, BackendResult};
pub use geotiff::{GeoTiffBackend, GeoTiffConfig, GeoTiffMetadata, GeoTiffReader};
pub use simulated::{SimulatedBackend, StoredData, StoredRaster};
