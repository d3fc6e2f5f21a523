//! In-memory reconciliation: detect, plan, warp, remap, fill, summarize.
//!
//! The streaming service drives the same stages block by block; this
//! engine runs them over whole buffers for small rasters and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use class_mapping::{
    ClassificationDetector, ClassificationSystem, DetectorConfig, MappingPlan, MappingTable,
    SystemRegistry,
};
use landcover_common::{
    Crs, GridGeometry, MemoryRaster, PixelType, RasterGrid, RasterSource, CODE_NODATA,
};
use projection::{CategoricalResampling, GridAlignmentSpec, Reprojector};
use tracing::{info, warn};

use crate::config::ProcessorConfig;
use crate::error::{ProcessorError, Result};
use crate::gapfill::fill;
use crate::remap::{remap, RemapOptions};
use crate::sampling::sample_distinct_codes;
use crate::stats::{summarize, StatisticsReport};

/// Where the mapping table for a run comes from.
#[derive(Debug, Clone, Default)]
pub enum MappingSource {
    /// Detect the scheme from the raster's codes.
    #[default]
    Detect,
    /// Use the registry table of a named scheme.
    System(ClassificationSystem),
    /// Use this table as is.
    Table(Arc<MappingTable>),
}

/// The table chosen for a run and why.
#[derive(Debug, Clone)]
pub struct MappingSelection {
    pub system: ClassificationSystem,
    pub table: Arc<MappingTable>,
    pub plan: MappingPlan,
    /// Set when the plan was not auto-mappable and the run was forced.
    pub forced: bool,
    pub warnings: Vec<String>,
}

/// Choose a table for the observed codes and gate it on the plan.
///
/// A plan that is not auto-mappable fails with
/// [`ProcessorError::NotAutoMappable`] unless `force` is set, in which case
/// its blockers are carried as warnings.
pub fn select_mapping(
    registry: &SystemRegistry,
    detector: &ClassificationDetector,
    observed: &BTreeSet<i32>,
    source: &MappingSource,
    threshold: f32,
    force: bool,
) -> Result<MappingSelection> {
    let (system, table, plan) = match source {
        MappingSource::Table(table) => {
            let system = detector.detect(observed);
            let plan = MappingPlan::for_table(system, table, observed, threshold);
            (system, Some(table.clone()), plan)
        }
        MappingSource::System(system) => {
            let plan = registry.plan_for(*system, observed, threshold);
            (*system, registry.table(*system), plan)
        }
        MappingSource::Detect => {
            let system = detector.detect(observed);
            let plan = registry.plan_for(system, observed, threshold);
            (system, registry.table(system), plan)
        }
    };

    let mut warnings = Vec::new();
    let forced = !plan.auto_mappable;
    if forced {
        let reasons = plan.blockers();
        if !force {
            return Err(ProcessorError::NotAutoMappable {
                system: system.to_string(),
                reasons,
            });
        }
        warn!(system = %system, reasons = ?reasons, "Proceeding with forced mapping");
        warnings.extend(reasons.into_iter().map(|r| format!("forced: {}", r)));
    }

    let table = table.ok_or_else(|| ProcessorError::NoTable(system.to_string()))?;
    warnings.extend(table.validate().warnings());

    info!(
        system = %system,
        table = %table.name(),
        mapped = plan.auto_mapped_count(),
        unmapped = plan.manual_review_count(),
        forced,
        "Selected mapping table"
    );

    Ok(MappingSelection {
        system,
        table,
        plan,
        forced,
        warnings,
    })
}

/// Output grid request for a reconciliation.
#[derive(Debug, Clone)]
pub struct TargetGrid {
    pub crs: Crs,
    pub resolution: Option<f64>,
    pub alignment: Option<GridAlignmentSpec>,
    pub resampling: CategoricalResampling,
}

impl TargetGrid {
    /// Reproject into `crs` at a resolution derived from the source.
    pub fn new(crs: Crs) -> Self {
        Self {
            crs,
            resolution: None,
            alignment: None,
            resampling: CategoricalResampling::Nearest,
        }
    }

    pub fn with_alignment(mut self, alignment: GridAlignmentSpec) -> Self {
        self.alignment = Some(alignment);
        self
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_resampling(mut self, resampling: CategoricalResampling) -> Self {
        self.resampling = resampling;
        self
    }
}

/// One in-memory reconciliation job.
#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub source: MemoryRaster<i32>,
    pub mapping: MappingSource,
    /// Keep the source grid when absent.
    pub target: Option<TargetGrid>,
    pub force: bool,
}

impl ReconcileRequest {
    pub fn new(source: MemoryRaster<i32>) -> Self {
        Self {
            source,
            mapping: MappingSource::Detect,
            target: None,
            force: false,
        }
    }
}

/// Everything a reconciliation produced.
#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    /// Output grid: `i16` codes with -9999 no-data.
    pub grid: RasterGrid,
    pub codes: Vec<i16>,
    pub confidence: Option<Vec<f32>>,
    /// Pixels per target code straight after remapping.
    pub class_counts: BTreeMap<i16, u64>,
    pub unmapped_count: u64,
    pub filled_count: u64,
    pub statistics: StatisticsReport,
    pub system: ClassificationSystem,
    pub plan: MappingPlan,
    pub warnings: Vec<String>,
}

/// Runs reconciliations over in-memory rasters.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    registry: Arc<SystemRegistry>,
    detector: ClassificationDetector,
    reprojector: Reprojector,
    config: ProcessorConfig,
}

impl ReconciliationEngine {
    pub fn new(registry: Arc<SystemRegistry>, reprojector: Reprojector, config: ProcessorConfig) -> Self {
        Self {
            detector: ClassificationDetector::new(registry.clone()),
            registry,
            reprojector,
            config,
        }
    }

    pub fn with_detector_config(mut self, config: DetectorConfig) -> Self {
        self.detector = ClassificationDetector::with_config(self.registry.clone(), config);
        self
    }

    pub fn registry(&self) -> &SystemRegistry {
        &self.registry
    }

    pub fn detector(&self) -> &ClassificationDetector {
        &self.detector
    }

    pub fn reprojector(&self) -> &Reprojector {
        &self.reprojector
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Sample `source` and pick its table.
    pub fn select<S: RasterSource + ?Sized>(
        &self,
        source: &mut S,
        mapping: &MappingSource,
        force: bool,
    ) -> Result<MappingSelection> {
        let observed =
            sample_distinct_codes(source, self.config.sample_limit, self.config.block_rows)?;
        select_mapping(
            &self.registry,
            &self.detector,
            &observed,
            mapping,
            self.config.confidence_threshold,
            force,
        )
    }

    pub fn reconcile(&self, request: ReconcileRequest) -> Result<ReconciliationResult> {
        self.config.validate().map_err(ProcessorError::config)?;
        let ReconcileRequest {
            mut source,
            mapping,
            target,
            force,
        } = request;

        let selection = self.select(&mut source, &mapping, force)?;
        let mut warnings = selection.warnings;

        let (grid, data) = source.into_parts();
        let (geometry, data, source_nodata) = match &target {
            Some(target) => {
                let geometry = self.warp_geometry(&grid.geometry, target)?;
                let warped =
                    self.reprojector
                        .reproject(&grid, &data, &geometry, target.resampling)?;
                let fill_value = grid.nodata_code().unwrap_or(CODE_NODATA as i32);
                (geometry, warped, Some(fill_value))
            }
            None => (grid.geometry.clone(), data, grid.nodata_code()),
        };

        let options = RemapOptions {
            emit_confidence: self.config.emit_confidence,
            uncertain_to_nodata: self.config.uncertain_to_nodata,
            source_nodata,
        };
        let remapped = remap(&data, selection.table.clone(), &options);
        if remapped.unmapped_count() > 0 {
            warnings.push(format!(
                "{} pixels had codes without a rule: {:?}",
                remapped.unmapped_count(),
                remapped.tally.unmapped_codes
            ));
        }

        let (codes, filled_count) = if self.config.fill_gaps {
            let before = count_nodata(&remapped.codes);
            let filled = fill(
                &remapped.codes,
                geometry.width,
                geometry.height,
                CODE_NODATA,
                self.config.gap_fill_window,
            )?;
            let after = count_nodata(&filled);
            (filled, before - after)
        } else {
            (remapped.codes, 0)
        };

        let statistics = summarize(
            &codes,
            CODE_NODATA,
            selection.table.descriptions(),
            remapped.confidence.as_deref(),
        )?;

        info!(
            system = %selection.system,
            width = geometry.width,
            height = geometry.height,
            unmapped = remapped.tally.unmapped_count,
            filled = filled_count,
            "Reconciliation complete"
        );

        Ok(ReconciliationResult {
            grid: RasterGrid::new(geometry, Some(CODE_NODATA as f64), PixelType::I16),
            codes,
            confidence: remapped.confidence,
            class_counts: remapped.tally.class_counts,
            unmapped_count: remapped.tally.unmapped_count,
            filled_count,
            statistics,
            system: selection.system,
            plan: selection.plan,
            warnings,
        })
    }

    fn warp_geometry(&self, source: &GridGeometry, target: &TargetGrid) -> Result<GridGeometry> {
        Ok(self.reprojector.target_geometry(
            source,
            &target.crs,
            target.resolution,
            target.alignment.as_ref(),
        )?)
    }
}

fn count_nodata(codes: &[i16]) -> u64 {
    codes.iter().filter(|&&c| c == CODE_NODATA).count() as u64
}
