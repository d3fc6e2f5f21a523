//! Error types for CRS resolution and reprojection.

use landcover_common::RasterError;
use thiserror::Error;

/// Errors that can occur while resolving or applying a projection.
#[derive(Error, Debug)]
pub enum ProjectionError {
    /// No definition could be found for the CRS and no fallback applies.
    #[error("cannot resolve CRS {crs}: {reason}")]
    CrsResolution { crs: String, reason: String },

    /// A definition was found but `proj4rs` rejected it.
    #[error("invalid projection definition for {crs}: {reason}")]
    InvalidDefinition { crs: String, reason: String },

    /// A coordinate could not be transformed.
    #[error("coordinate transform failed: {0}")]
    Transform(String),

    /// The alignment lattice is unusable.
    #[error("invalid grid alignment: {0}")]
    InvalidAlignment(String),

    /// Unknown resampling name.
    #[error("unsupported resampling '{0}': categorical data allows nearest or mode")]
    UnsupportedResampling(String),

    /// Underlying raster access failed.
    #[error(transparent)]
    Raster(#[from] RasterError),
}

impl ProjectionError {
    /// Create a CrsResolution error.
    pub fn crs_resolution(crs: impl ToString, reason: impl Into<String>) -> Self {
        Self::CrsResolution {
            crs: crs.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidAlignment error.
    pub fn invalid_alignment(msg: impl Into<String>) -> Self {
        Self::InvalidAlignment(msg.into())
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
