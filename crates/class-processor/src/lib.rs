//! Categorical processing of class rasters.
//!
//! Stages are [`BlockProducer`](landcover_common::BlockProducer)s that pull
//! from the stage before them, so a writer asking for one window at a time
//! bounds memory to a block plus any halo:
//!
//! ```text
//!   RasterSource ─► [WarpStage] ─► RemapStage ─► GapFillStage ─► writer
//!                              └─► ConfidenceStage ─────────────► writer
//! ```
//!
//! The same operations exist over whole buffers ([`remap`], [`fill`],
//! [`summarize`]) and are combined by [`ReconciliationEngine`].

pub mod config;
pub mod engine;
pub mod error;
pub mod gapfill;
pub mod remap;
pub mod sampling;
pub mod stats;

pub use config::ProcessorConfig;
pub use engine::{
    select_mapping, MappingSelection, MappingSource, ReconcileRequest, ReconciliationEngine,
    ReconciliationResult, TargetGrid,
};
pub use error::{ProcessorError, Result};
pub use gapfill::{fill, window_radius, GapFillStage};
pub use remap::{remap, CodeResolver, ConfidenceStage, RemapOptions, RemapOutput, RemapStage, RemapTally};
pub use sampling::sample_distinct_codes;
pub use stats::{
    summarize, ClassStatistics, ConfidenceBuckets, StatisticsAccumulator, StatisticsReport,
};
