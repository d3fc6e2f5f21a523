//! File-to-file reconciliation through a [`RasterBackend`].
//!
//! Every stage pulls blocks from the one before it, so memory stays at a
//! few blocks regardless of raster size:
//!
//! ```text
//!   input ─► [WarpStage] ─► RemapStage ─► remapped (scratch)
//!   remapped ─► GapFillStage ─► StatisticsTap ─► output
//!   input ─► [WarpStage] ─► ConfidenceStage ─► confidence output
//! ```
//!
//! Without gap filling the remap feeds the output directly. The written
//! CRS is checked afterwards and rewritten once if the backend got it
//! wrong. Intermediates are removed however the run ends. A cancelled run
//! stops at its next block and is treated as failed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use class_mapping::{MappingTable, SystemRegistry};
use class_processor::{
    ConfidenceStage, GapFillStage, MappingSelection, ReconciliationEngine,
    RemapOptions, RemapStage, RemapTally, StatisticsAccumulator,
};
use landcover_common::{
    BlockProducer, BlockWindow, Crs, GridGeometry, RasterError, RasterResult, SourceBlocks,
    CODE_NODATA,
};
use projection::{
    AlignmentCheck, CategoricalResampling, GridAligner, GridAlignmentSpec, Reprojector, WarpStage,
};
use raster_io::{cleanup, remove_scratch_dir, NarrowCodes, RasterBackend, WriteReport};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ReconcilerConfig;
use crate::error::{PipelineError, Result};
use crate::job::JobSpec;
use crate::report::JobReport;

type CodeBlocks = Box<dyn BlockProducer<i32>>;

/// Output grid of a job and how to get onto it.
#[derive(Debug, Clone)]
pub struct OutputPlan {
    pub geometry: GridGeometry,
    /// Present when the input is warped.
    pub resampling: Option<CategoricalResampling>,
    pub alignment: Option<GridAlignmentSpec>,
}

/// Feeds each block of codes, and its confidence, into a statistics
/// accumulator on the way to the writer.
struct StatisticsTap<P> {
    upstream: P,
    confidence: Option<Box<dyn BlockProducer<f32>>>,
    stats: StatisticsAccumulator,
}

impl<P> StatisticsTap<P> {
    fn into_parts(self) -> (P, StatisticsAccumulator) {
        (self.upstream, self.stats)
    }
}

impl<P: BlockProducer<i16>> BlockProducer<i16> for StatisticsTap<P> {
    fn produce(&mut self, window: &BlockWindow) -> RasterResult<Vec<i16>> {
        let codes = self.upstream.produce(window)?;
        let confidence = match self.confidence.as_mut() {
            Some(c) => Some(c.produce(window)?),
            None => None,
        };
        self.stats
            .add_block(&codes, confidence.as_deref())
            .map_err(RasterError::from)?;
        Ok(codes)
    }
}

/// Stops pulling blocks once its token is cancelled.
struct Cancellable<P> {
    upstream: P,
    cancel: CancellationToken,
}

impl<T, P: BlockProducer<T>> BlockProducer<T> for Cancellable<P> {
    fn produce(&mut self, window: &BlockWindow) -> RasterResult<Vec<T>> {
        if self.cancel.is_cancelled() {
            return Err(RasterError::Cancelled);
        }
        self.upstream.produce(window)
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

/// Paths a run has created so far.
#[derive(Debug, Default)]
struct RunArtifacts {
    intermediates: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
}

/// Runs [`JobSpec`]s against one backend.
pub struct ReconcilePipeline {
    backend: Arc<dyn RasterBackend>,
    engine: ReconciliationEngine,
    config: ReconcilerConfig,
}

impl ReconcilePipeline {
    pub fn new(backend: Arc<dyn RasterBackend>, config: ReconcilerConfig) -> Result<Self> {
        config.validate().map_err(PipelineError::config)?;
        let registry = Arc::new(SystemRegistry::builtin()?);
        let engine = ReconciliationEngine::new(
            registry,
            Reprojector::new(config.reprojector.clone()),
            config.processor.clone(),
        );
        Ok(Self {
            backend,
            engine,
            config,
        })
    }

    pub fn backend(&self) -> &dyn RasterBackend {
        self.backend.as_ref()
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    fn reprojector(&self) -> &Reprojector {
        self.engine.reprojector()
    }

    /// Run one job end to end. Intermediates are always removed; outputs
    /// are removed too when the job fails.
    pub fn run(&self, job: &JobSpec) -> Result<JobReport> {
        self.run_with_cancel(job, &CancellationToken::new())
    }

    /// Like [`run`](Self::run), but gives up with
    /// [`PipelineError::Cancelled`] once `cancel` fires.
    #[instrument(skip_all, fields(input = %job.input.display(), output = %job.output.display()))]
    pub fn run_with_cancel(&self, job: &JobSpec, cancel: &CancellationToken) -> Result<JobReport> {
        let run_id = Uuid::new_v4();
        let scratch = self.config.scratch_dir.join(run_id.to_string());
        let mut artifacts = RunArtifacts::default();

        let outcome = match self.execute(job, run_id, &scratch, &mut artifacts, cancel) {
            Err(_) if cancel.is_cancelled() => Err(PipelineError::Cancelled),
            other => other,
        };

        let backend = self.backend.as_ref();
        let mut cleaned = cleanup(backend, &artifacts.intermediates);
        cleaned.merge(remove_scratch_dir(&scratch));

        let outcome = outcome.and_then(|mut report| {
            report.warnings.extend(cleaned.warnings());
            if job.options.write_report {
                report.save_json(&job.report_path())?;
            }
            Ok(report)
        });

        if let Err(e) = &outcome {
            error!(run_id = %run_id, error = %e, "Reconciliation failed");
            cleaned.merge(cleanup(backend, &artifacts.outputs));
            for w in cleaned.warnings() {
                warn!(run_id = %run_id, "{}", w);
            }
        }
        outcome
    }

    fn execute(
        &self,
        job: &JobSpec,
        run_id: Uuid,
        scratch: &Path,
        artifacts: &mut RunArtifacts,
        cancel: &CancellationToken,
    ) -> Result<JobReport> {
        let started_at = Utc::now();
        let processor = &self.config.processor;
        info!(run_id = %run_id, backend = self.backend.name(), "Starting reconciliation");

        let validation = self.backend.validate(&job.input)?;
        if !validation.is_usable() {
            return Err(PipelineError::invalid_input(&job.input, validation.errors()));
        }
        let mut warnings: Vec<String> = validation
            .warnings
            .iter()
            .map(|w| format!("input: {}", w))
            .collect();

        let selection = self.select(job)?;
        warnings.extend(selection.warnings.iter().cloned());
        let table = selection.table.clone();

        let source_geometry = self.backend.open(&job.input)?.grid().geometry.clone();
        let plan = self.plan_output(job, &source_geometry)?;
        let geometry = plan.geometry.clone();

        checkpoint(cancel)?;
        let mut outputs = Vec::new();
        artifacts.outputs.push(job.output.clone());
        let (tally, filled_count, stats) = if processor.fill_gaps {
            std::fs::create_dir_all(scratch)?;
            let remapped = scratch.join("remapped.tif");
            artifacts.intermediates.push(remapped.clone());
            let (options, input) = self.input_blocks(job, &plan, cancel)?;
            let mut remap = RemapStage::new(input, table.clone(), &options);
            self.backend
                .write_codes(&remapped, &geometry, &mut remap, processor.block_rows)?;
            let tally = remap.into_tally();

            let reopened = self.backend.open(&remapped)?;
            let nodata = reopened.grid().nodata_code();
            let reopened = Cancellable {
                upstream: SourceBlocks(reopened),
                cancel: cancel.clone(),
            };
            let fill = GapFillStage::new(
                NarrowCodes::new(reopened, nodata),
                geometry.width,
                geometry.height,
                CODE_NODATA,
                processor.gap_fill_window,
            )?;
            let (write, fill, stats) = self.write_output(job, &plan, fill, &table, cancel)?;
            outputs.push(write);
            (tally, fill.filled_count(), stats)
        } else {
            let (options, input) = self.input_blocks(job, &plan, cancel)?;
            let remap = RemapStage::new(input, table.clone(), &options);
            let (write, remap, stats) = self.write_output(job, &plan, remap, &table, cancel)?;
            outputs.push(write);
            (remap.into_tally(), 0, stats)
        };

        let confidence_output = if processor.emit_confidence {
            let path = job.confidence_path();
            artifacts.outputs.push(path.clone());
            let (options, input) = self.input_blocks(job, &plan, cancel)?;
            let mut stage = ConfidenceStage::new(input, table.clone(), &options);
            outputs.push(self.backend.write_confidence(
                &path,
                &geometry,
                &mut stage,
                processor.block_rows,
            )?);
            Some(path)
        } else {
            None
        };

        checkpoint(cancel)?;
        let mut crs_repaired = Vec::new();
        for written in &outputs {
            if self.verify_crs(&written.path, &geometry.crs)? {
                warnings.push(format!(
                    "{}: spatial reference rewritten to {}",
                    written.path.display(),
                    geometry.crs
                ));
                crs_repaired.push(written.path.clone());
            }
        }

        let alignment = plan
            .alignment
            .map(|spec| self.verify_alignment(&job.output, spec))
            .transpose()?;

        warnings.extend(tally_warnings(&tally));

        let statistics = stats.finish(table.descriptions());
        info!(
            run_id = %run_id,
            system = %selection.system,
            width = geometry.width,
            height = geometry.height,
            unmapped = tally.unmapped_count,
            filled = filled_count,
            warnings = warnings.len(),
            "Reconciliation complete"
        );

        Ok(JobReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            backend: self.backend.name().to_string(),
            input: job.input.clone(),
            output: job.output.clone(),
            confidence_output,
            system: selection.system,
            table: table.name().to_string(),
            forced: selection.forced,
            plan: selection.plan,
            width: geometry.width,
            height: geometry.height,
            crs: geometry.crs.clone(),
            unmapped_count: tally.unmapped_count,
            unmapped_codes: tally.unmapped_codes,
            uncertain_count: tally.uncertain_count,
            filled_count,
            crs_repaired,
            alignment,
            statistics,
            warnings,
        })
    }

    /// Sample the input's codes and choose its table.
    pub fn select(&self, job: &JobSpec) -> Result<MappingSelection> {
        let mapping = job.mapping_source()?;
        let mut source = self.backend.open(&job.input)?;
        Ok(self.engine.select(&mut source, &mapping, job.options.force)?)
    }

    /// Output grid for a job: the input grid, or a warped and optionally
    /// aligned one.
    pub fn plan_output(&self, job: &JobSpec, source: &GridGeometry) -> Result<OutputPlan> {
        if !job.warps() {
            return Ok(OutputPlan {
                geometry: source.clone(),
                resampling: None,
                alignment: None,
            });
        }

        let explicit = job.target_crs()?;
        let options = &job.options;
        let (alignment, lattice_crs) = match (&options.reference, options.align_landfire) {
            (Some(reference), _) => {
                let reference = self.backend.open(reference)?.grid().geometry.clone();
                let spec = GridAlignmentSpec::from_reference(&reference, options.resolution)?;
                (Some(spec), Some(reference.crs))
            }
            (None, true) => {
                let spec = GridAlignmentSpec::landfire_conus(options.resolution.unwrap_or(30.0))?;
                (Some(spec), Some(GridAlignmentSpec::landfire_crs()))
            }
            (None, false) => (None, None),
        };

        let crs = match (explicit, lattice_crs) {
            (Some(explicit), Some(lattice)) if !explicit.is_equivalent(&lattice) => {
                return Err(PipelineError::config(format!(
                    "target CRS {} differs from the alignment lattice CRS {}",
                    explicit, lattice
                )))
            }
            (Some(crs), _) | (None, Some(crs)) => crs,
            (None, None) => source.crs.clone(),
        };

        let geometry = self.reprojector().target_geometry(
            source,
            &crs,
            options.resolution,
            alignment.as_ref(),
        )?;
        info!(
            crs = %geometry.crs,
            width = geometry.width,
            height = geometry.height,
            aligned = alignment.is_some(),
            "Planned output grid"
        );
        Ok(OutputPlan {
            geometry,
            resampling: Some(options.resampling),
            alignment,
        })
    }

    /// Codes of the input on the output grid, with the remap options that
    /// match them.
    fn input_blocks(
        &self,
        job: &JobSpec,
        plan: &OutputPlan,
        cancel: &CancellationToken,
    ) -> Result<(RemapOptions, CodeBlocks)> {
        let source = self.backend.open(&job.input)?;
        let (source_nodata, blocks): (Option<i32>, CodeBlocks) = match plan.resampling {
            Some(resampling) => {
                let warp =
                    WarpStage::new(self.reprojector(), source, plan.geometry.clone(), resampling)?;
                (warp.output_grid().nodata_code(), Box::new(warp))
            }
            None => (source.grid().nodata_code(), Box::new(SourceBlocks(source))),
        };
        let blocks: CodeBlocks = Box::new(Cancellable {
            upstream: blocks,
            cancel: cancel.clone(),
        });
        let options = RemapOptions {
            emit_confidence: self.config.processor.emit_confidence,
            uncertain_to_nodata: self.config.processor.uncertain_to_nodata,
            source_nodata,
        };
        Ok((options, blocks))
    }

    /// Write the final codes, collecting statistics on the way.
    fn write_output<P: BlockProducer<i16>>(
        &self,
        job: &JobSpec,
        plan: &OutputPlan,
        upstream: P,
        table: &Arc<MappingTable>,
        cancel: &CancellationToken,
    ) -> Result<(WriteReport, P, StatisticsAccumulator)> {
        let mut confidence: Option<Box<dyn BlockProducer<f32>>> = None;
        if self.config.processor.emit_confidence {
            let (options, input) = self.input_blocks(job, plan, cancel)?;
            confidence = Some(Box::new(ConfidenceStage::new(input, table.clone(), &options)));
        }

        let mut tap = StatisticsTap {
            upstream,
            confidence,
            stats: StatisticsAccumulator::new(CODE_NODATA),
        };
        let write = self.backend.write_codes(
            &job.output,
            &plan.geometry,
            &mut tap,
            self.config.processor.block_rows,
        )?;
        let (upstream, stats) = tap.into_parts();
        Ok((write, upstream, stats))
    }

    /// Check the CRS stored with `path`, rewriting it once if it is wrong.
    /// Returns whether a rewrite was needed.
    fn verify_crs(&self, path: &Path, expected: &Crs) -> Result<bool> {
        let found = self.backend.spatial_reference(path)?;
        if found.as_ref().is_some_and(|c| c.is_equivalent(expected)) {
            return Ok(false);
        }

        warn!(
            path = %path.display(),
            expected = %expected,
            found = ?found,
            "Output CRS does not match, rewriting"
        );
        self.backend.set_spatial_reference(path, expected)?;

        let found = self.backend.spatial_reference(path)?;
        match found {
            Some(c) if c.is_equivalent(expected) => Ok(true),
            other => Err(PipelineError::crs_mismatch(path, expected, other.as_ref())),
        }
    }

    fn verify_alignment(&self, path: &Path, spec: GridAlignmentSpec) -> Result<AlignmentCheck> {
        let transform = self.backend.validate(path)?.transform.ok_or_else(|| {
            PipelineError::invalid_input(path, vec!["output has no transform".to_string()])
        })?;
        let check = GridAligner::new(spec).verify(&transform);
        if !check.aligned {
            return Err(PipelineError::Misaligned {
                path: path.display().to_string(),
                offset_x: check.offset_x,
                offset_y: check.offset_y,
            });
        }
        Ok(check)
    }
}

fn tally_warnings(tally: &RemapTally) -> Vec<String> {
    let mut warnings = Vec::new();
    if tally.unmapped_count > 0 {
        warnings.push(format!(
            "{} pixels had codes without a rule: {:?}",
            tally.unmapped_count, tally.unmapped_codes
        ));
    }
    if tally.uncertain_count > 0 {
        warnings.push(format!(
            "{} pixels of the uncertain class were written as no-data",
            tally.uncertain_count
        ));
    }
    warnings
}
