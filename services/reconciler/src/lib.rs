//! Land-cover reconciliation service.
//!
//! Turns categorical land-cover GeoTIFFs into FBFM40 fuel-model rasters on
//! a chosen grid. Single jobs run through [`ReconcilePipeline`]; manifests
//! of jobs run through [`run_batch`].

pub mod batch;
pub mod config;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod report;

pub use batch::{run_batch, BatchManifest, BatchSummary, DirectoryJob, JobOutcome, JobStatus};
pub use config::ReconcilerConfig;
pub use error::{PipelineError, Result};
pub use job::{JobOptions, JobSpec};
pub use pipeline::{OutputPlan, ReconcilePipeline};
pub use report::JobReport;
