//! Error types for class processing.

use class_mapping::MappingError;
use landcover_common::RasterError;
use projection::ProjectionError;
use thiserror::Error;

/// Errors that can occur while remapping, filling or summarizing rasters.
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Gap-fill window must be odd and at least 1.
    #[error("gap-fill window must be an odd size >= 1, got {0}")]
    InvalidWindow(usize),

    /// Buffer does not match the raster dimensions.
    #[error("buffer holds {actual} pixels, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    /// The selected table does not cover the raster well enough and the run
    /// was not forced.
    #[error("{system} mapping needs manual confirmation: {}", reasons.join("; "))]
    NotAutoMappable { system: String, reasons: Vec<String> },

    /// No table exists for the requested system.
    #[error("no mapping table for classification system {0}")]
    NoTable(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Mapping(#[from] MappingError),
}

impl ProcessorError {
    /// Create a BufferSize error unless the lengths agree.
    pub fn check_len(expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::BufferSize { expected, actual })
        }
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<ProcessorError> for RasterError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Raster(inner) => inner,
            other => RasterError::read_failed(other.to_string()),
        }
    }
}

/// Result type for processor operations.
pub type Result<T> = std::result::Result<T, ProcessorError>;
