//! Error types for raster backends.

use std::io;
use std::path::Path;

use landcover_common::RasterError;
use projection::ProjectionError;
use thiserror::Error;

/// Errors that can occur while reading, writing or inspecting rasters.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The file could not be opened or decoded.
    #[error("failed to open raster {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    /// The raster has no usable spatial reference.
    #[error("raster {0} has no spatial reference")]
    MissingSpatialReference(String),

    /// The raster's layout or sample type is not supported.
    #[error("unsupported raster {path}: {reason}")]
    Unsupported { path: String, reason: String },

    /// No raster is stored at the path.
    #[error("raster not found: {0}")]
    NotFound(String),

    /// Encoding or persisting an output failed. Nothing is left at the
    /// destination.
    #[error("failed to write raster {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    /// Every pixel is no-data, so there is no footprint.
    #[error("raster {0} contains no data pixels")]
    EmptyFootprint(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

impl BackendError {
    /// Create an OpenFailed error.
    pub fn open_failed(path: &Path, reason: impl ToString) -> Self {
        Self::OpenFailed {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an Unsupported error.
    pub fn unsupported(path: &Path, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    /// Create a WriteFailed error.
    pub fn write_failed(path: &Path, reason: impl ToString) -> Self {
        Self::WriteFailed {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn not_found(path: &Path) -> Self {
        Self::NotFound(path.display().to_string())
    }

    pub fn missing_spatial_reference(path: &Path) -> Self {
        Self::MissingSpatialReference(path.display().to_string())
    }

    /// Whether this error means the raster simply is not there.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;
