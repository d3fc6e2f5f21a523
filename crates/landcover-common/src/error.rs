//! Error types shared by raster sources, producers and grid geometry.

use thiserror::Error;

/// Result type alias using RasterError.
pub type RasterResult<T> = Result<T, RasterError>;

/// Errors raised while describing or streaming raster data.
#[derive(Debug, Error)]
pub enum RasterError {
    // === Geometry Errors ===
    #[error("Grid must be north-up without rotation: {0}")]
    NotNorthUp(String),

    #[error("Degenerate grid transform: {0}")]
    SingularTransform(String),

    #[error("Invalid grid dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    // === Input Errors ===
    #[error("Raster has no spatial reference: {0}")]
    MissingSpatialReference(String),

    #[error("Unsupported pixel type: {0}")]
    UnsupportedPixelType(String),

    #[error("Pixel value {value} does not fit the {pixel_type} range")]
    ValueOutOfRange { value: String, pixel_type: String },

    // === Streaming Errors ===
    #[error("Window {window} lies outside a {width}x{height} grid")]
    WindowOutOfBounds {
        window: String,
        width: usize,
        height: usize,
    },

    #[error("Buffer holds {actual} pixels but {expected} were expected")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Failed to read raster data: {0}")]
    ReadFailed(String),

    #[error("Failed to write raster data: {0}")]
    WriteFailed(String),

    #[error("Block stream cancelled")]
    Cancelled,
}

impl RasterError {
    /// Create a ReadFailed error.
    pub fn read_failed(msg: impl Into<String>) -> Self {
        Self::ReadFailed(msg.into())
    }

    /// Create a WriteFailed error.
    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::WriteFailed(msg.into())
    }

    /// Check a buffer length against the expected pixel count.
    pub fn check_len(expected: usize, actual: usize) -> RasterResult<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::BufferSizeMismatch { expected, actual })
        }
    }
}

impl From<std::io::Error> for RasterError {
    fn from(err: std::io::Error) -> Self {
        Self::ReadFailed(err.to_string())
    }
}
