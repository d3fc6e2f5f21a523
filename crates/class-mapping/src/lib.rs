//! Class mapping between land-cover classification systems.
//!
//! The canonical target is FBFM40 (Scott & Burgan fuel models). Source
//! rasters arrive in some other scheme; this crate knows which schemes
//! exist, how to recognise them from the codes a raster contains, and how
//! each one maps onto FBFM40 with a per-class confidence.
//!
//! ```text
//!   observed codes ──► ClassificationDetector ──► ClassificationSystem
//!                                                        │
//!                          SystemRegistry ◄──────────────┘
//!                                │
//!                                ▼
//!   MappingDocument ◄──► MappingTable ──► validate() ──► ValidationReport
//!                                │
//!                                ▼
//!                      MappingPlan (auto-mappable?)
//! ```
//!
//! Tables are immutable once built and are shared between workers behind
//! an `Arc`.

pub mod detector;
pub mod document;
pub mod error;
pub mod fbfm40;
pub mod plan;
pub mod rules;
pub mod systems;
pub mod validation;

pub use detector::{ClassificationDetector, DetectorConfig};
pub use document::{DocumentFormat, DocumentMetadata, MappingDocument, RuleRecord};
pub use error::{MappingError, Result};
pub use plan::{recommend_targets, MappingPlan, Recommendation};
pub use rules::{
    ClassMappingRule, ConfidenceBand, MappedClass, MappingTable, MappingTableBuilder, Provenance,
    TableMetadata,
};
pub use systems::{ClassificationSystem, Magnitude, SystemDefinition, SystemRegistry};
pub use validation::{
    CheckOutcome, ConfidenceDistribution, SemanticRule, SemanticViolation, ValidationReport,
};
