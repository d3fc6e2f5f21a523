//! Errors raised while running a reconciliation job.

use std::path::Path;

use class_mapping::MappingError;
use class_processor::ProcessorError;
use landcover_common::{Crs, RasterError};
use projection::ProjectionError;
use raster_io::BackendError;
use thiserror::Error;

/// Failure of one job. Every variant is fatal for that job only.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The input cannot be processed as it is.
    #[error("invalid input {path}: {}", problems.join("; "))]
    InvalidInput { path: String, problems: Vec<String> },

    /// The written CRS still differed after one corrective rewrite.
    #[error("{path} declares {found} after repair, expected {expected}")]
    CrsMismatch {
        path: String,
        expected: String,
        found: String,
    },

    /// Output origin is off the requested lattice.
    #[error("{path} is off the reference lattice by ({offset_x}, {offset_y})")]
    Misaligned {
        path: String,
        offset_x: f64,
        offset_y: f64,
    },

    /// The job did not finish within its time budget.
    #[error("job timed out after {0} s")]
    Timeout(u64),

    /// The run was stopped from outside before it finished.
    #[error("job cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn invalid_input(path: &Path, problems: Vec<String>) -> Self {
        Self::InvalidInput {
            path: path.display().to_string(),
            problems,
        }
    }

    pub fn crs_mismatch(path: &Path, expected: &Crs, found: Option<&Crs>) -> Self {
        Self::CrsMismatch {
            path: path.display().to_string(),
            expected: expected.to_string(),
            found: found.map_or_else(|| "no CRS".to_string(), |c| c.to_string()),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Short machine-readable kind for batch summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::CrsMismatch { .. } => "crs_mismatch",
            Self::Misaligned { .. } => "misaligned",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
            Self::Processor(ProcessorError::NotAutoMappable { .. }) => "needs_review",
            Self::Processor(_) => "processing",
            Self::Backend(_) => "backend",
            Self::Projection(_) => "projection",
            Self::Mapping(_) => "mapping",
            Self::Raster(_) => "raster",
            Self::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
