//! Error types for mapping tables and documents.

use thiserror::Error;

/// Errors that can occur while building, loading or saving mapping tables.
#[derive(Error, Debug)]
pub enum MappingError {
    /// Two rules share a source code.
    #[error("duplicate rule for source code {0}")]
    DuplicateSource(i32),

    /// Confidence outside [0, 1].
    #[error("confidence {confidence} for source code {source_code} is outside [0, 1]")]
    InvalidConfidence { source_code: i32, confidence: f32 },

    /// Target does not fit the 16-bit output raster.
    #[error("target code {target_code} for source code {source_code} does not fit in int16")]
    TargetOutOfRange { source_code: i32, target_code: i32 },

    /// Unrecognised system tag.
    #[error("unknown classification system: {0}")]
    UnknownSystem(String),

    /// The file extension does not name a supported document format.
    #[error("unsupported mapping document format: {0}")]
    UnsupportedFormat(String),

    /// A document could not be parsed.
    #[error("invalid mapping document: {0}")]
    InvalidDocument(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for MappingError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidDocument(err.to_string())
    }
}

impl From<serde_yaml::Error> for MappingError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::InvalidDocument(err.to_string())
    }
}

/// Result type for mapping operations.
pub type Result<T> = std::result::Result<T, MappingError>;
