//! File pipeline and batch runner, mostly over the in-memory backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use class_mapping::ClassificationSystem;
use landcover_common::{
    BlockWindow, Crs, GeoTransform, GridGeometry, MemoryRaster, PixelType, RasterGrid,
};
use projection::{GridAligner, GridAlignmentSpec};
use raster_io::{GeoTiffBackend, RasterBackend, SimulatedBackend, StoredRaster};
use reconciler::{
    run_batch, JobOptions, JobSpec, JobStatus, PipelineError, ReconcilePipeline, ReconcilerConfig,
};
use test_utils::{
    assert_codes_eq, create_patch_grid, crs, fbfm40, lattice, scenario, to_i16_codes,
};
use tokio_util::sync::CancellationToken;

fn albers_raster(width: usize, height: usize, origin: (f64, f64), data: Vec<i32>) -> MemoryRaster<i32> {
    let geometry = GridGeometry::new(
        width,
        height,
        GeoTransform::from_origin(origin.0, origin.1, 30.0, 30.0),
        Crs::Epsg(5070),
    )
    .unwrap();
    let grid = RasterGrid::new(geometry, Some(-9999.0), PixelType::I16);
    MemoryRaster::new(grid, data).unwrap()
}

fn on_lattice(width: usize, height: usize, data: Vec<i32>) -> MemoryRaster<i32> {
    let (ox, oy) = lattice::LANDFIRE_ORIGIN;
    albers_raster(width, height, (ox + 300_000.0, oy - 900_000.0), data)
}

fn config(scratch: &Path) -> ReconcilerConfig {
    ReconcilerConfig {
        scratch_dir: scratch.to_path_buf(),
        ..Default::default()
    }
}

fn pipeline(backend: &SimulatedBackend, config: ReconcilerConfig) -> ReconcilePipeline {
    ReconcilePipeline::new(Arc::new(backend.clone()), config).unwrap()
}

fn esri_job(input: &str, output: &str) -> JobSpec {
    JobSpec::new(input, output).with_options(JobOptions {
        system: Some("esri".to_string()),
        ..Default::default()
    })
}

fn codes_i16(backend: &SimulatedBackend, path: &str) -> Vec<i16> {
    backend
        .codes(Path::new(path))
        .unwrap()
        .into_iter()
        .map(|c| c as i16)
        .collect()
}

// ============================================================================
// Single jobs
// ============================================================================

#[test]
fn test_three_by_three_end_to_end() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    backend.insert_codes("in.tif", on_lattice(3, 3, scenario::SOURCE_3X3.to_vec()));

    let report = pipeline(&backend, config(scratch.path()))
        .run(&esri_job("in.tif", "out.tif"))
        .unwrap();

    assert_codes_eq!(&codes_i16(&backend, "out.tif"), &scenario::FILLED_3X3, 3);
    assert_eq!(report.system, ClassificationSystem::EsriLulc);
    assert!(!report.forced);
    assert_eq!(report.filled_count, 1);
    assert_eq!(report.unmapped_count, 0);
    assert_eq!(report.statistics.nodata_pixels, 0);
    assert_eq!(report.statistics.class(fbfm40::TL3).unwrap().pixel_count, 4);
    assert_eq!(report.confidence_output, Some(PathBuf::from("out_confidence.tif")));

    // The confidence raster follows the source pixels, so the hole stays 0.
    let confidence = backend.confidence(Path::new("out_confidence.tif")).unwrap();
    assert_eq!(confidence.len(), 9);
    assert_eq!(confidence[4], 0.0);
    assert!((confidence[0] - 0.95).abs() < 1e-6);
}

#[test]
fn test_geotiff_files_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.tif");
    let output = dir.path().join("out.tif");
    let backend = GeoTiffBackend::default();

    let source = on_lattice(3, 3, scenario::SOURCE_3X3.to_vec());
    let geometry = source.grid().geometry.clone();
    let grid = RasterGrid::new(geometry.clone(), Some(-9999.0), PixelType::I16);
    let mut codes = MemoryRaster::new(grid, to_i16_codes(&scenario::SOURCE_3X3)).unwrap();
    backend.write_codes(&input, &geometry, &mut codes, 2).unwrap();

    let pipeline = ReconcilePipeline::new(Arc::new(backend.clone()), config(scratch.path())).unwrap();
    let job = esri_job(input.to_str().unwrap(), output.to_str().unwrap());
    let report = pipeline.run(&job).unwrap();

    assert_eq!(report.system, ClassificationSystem::EsriLulc);
    assert_eq!(report.filled_count, 1);
    assert!(report.crs_repaired.is_empty());

    let mut reader = backend.reader(&output).unwrap();
    assert_eq!(reader.metadata().pixel_type, PixelType::I16);
    assert_eq!(reader.metadata().crs, Some(Crs::Epsg(5070)));
    let written: Vec<i16> = reader.read_window_as(&BlockWindow::full(3, 3)).unwrap();
    assert_codes_eq!(&written, &scenario::FILLED_3X3, 3);

    let mut confidence = backend.reader(&dir.path().join("out_confidence.tif")).unwrap();
    let values: Vec<f32> = confidence.read_window_as(&BlockWindow::full(3, 3)).unwrap();
    assert_eq!(values[4], 0.0);
    assert!((values[0] - 0.95).abs() < 1e-6);

    let mut left: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    left.sort();
    assert_eq!(left, vec!["in.tif", "out.tif", "out_confidence.tif"]);
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn test_intermediates_removed_after_success() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    backend.insert_codes("in.tif", on_lattice(3, 3, scenario::SOURCE_3X3.to_vec()));

    pipeline(&backend, config(scratch.path()))
        .run(&esri_job("in.tif", "out.tif"))
        .unwrap();

    let mut paths = backend.paths();
    paths.sort();
    assert_eq!(
        paths,
        vec![
            PathBuf::from("in.tif"),
            PathBuf::from("out.tif"),
            PathBuf::from("out_confidence.tif"),
        ]
    );
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn test_without_gap_fill_or_confidence() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    backend.insert_codes("in.tif", on_lattice(3, 3, scenario::SOURCE_3X3.to_vec()));

    let mut config = config(scratch.path());
    config.processor.fill_gaps = false;
    config.processor.emit_confidence = false;
    let report = pipeline(&backend, config)
        .run(&esri_job("in.tif", "out.tif"))
        .unwrap();

    assert_codes_eq!(&codes_i16(&backend, "out.tif"), &scenario::REMAPPED_3X3, 3);
    assert_eq!(report.filled_count, 0);
    assert_eq!(report.statistics.nodata_pixels, 1);
    assert!(report.statistics.confidence.is_none());
    assert!(report.confidence_output.is_none());
    assert!(!backend.contains(Path::new("out_confidence.tif")));
}

#[test]
fn test_output_crs_repaired_after_drift() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    backend.insert_codes("in.tif", on_lattice(3, 3, scenario::SOURCE_3X3.to_vec()));
    backend.inject_crs_drift(Crs::Epsg(4326), 1);

    let mut config = config(scratch.path());
    config.processor.fill_gaps = false;
    let report = pipeline(&backend, config)
        .run(&esri_job("in.tif", "out.tif"))
        .unwrap();

    assert_eq!(report.crs_repaired, vec![PathBuf::from("out.tif")]);
    assert!(report.warnings.iter().any(|w| w.contains("spatial reference rewritten")));
    assert_eq!(
        backend.spatial_reference(Path::new("out.tif")).unwrap(),
        Some(Crs::Epsg(5070))
    );
    assert_eq!(
        backend.spatial_reference(Path::new("out_confidence.tif")).unwrap(),
        Some(Crs::Epsg(5070))
    );
}

#[test]
fn test_detected_unknown_codes_need_review() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    backend.insert_codes("in.tif", on_lattice(4, 4, create_patch_grid(4, 4, 2, &[12, 13])));

    let err = pipeline(&backend, config(scratch.path()))
        .run(&JobSpec::new("in.tif", "out.tif"))
        .unwrap_err();

    assert!(matches!(err, PipelineError::Processor(_)));
    assert_eq!(err.kind(), "needs_review");
    assert_eq!(backend.paths(), vec![PathBuf::from("in.tif")]);
}

#[test]
fn test_forced_run_reports_unmapped_codes() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    backend.insert_codes("in.tif", on_lattice(4, 4, create_patch_grid(4, 4, 2, &[12, 13])));

    let mut job = esri_job("in.tif", "out.tif");
    let pipeline = pipeline(&backend, config(scratch.path()));
    assert!(pipeline.run(&job).is_err());

    job.options.force = true;
    let report = pipeline.run(&job).unwrap();
    assert!(report.forced);
    assert_eq!(report.unmapped_count, 16);
    assert_eq!(report.unmapped_codes.iter().copied().collect::<Vec<_>>(), vec![12, 13]);
    assert!(report.warnings.iter().any(|w| w.starts_with("forced:")));
    assert!(report.warnings.iter().any(|w| w.contains("without a rule")));
}

#[test]
fn test_input_without_crs_rejected() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    let raster = on_lattice(3, 3, scenario::SOURCE_3X3.to_vec());
    backend.insert("in.tif", StoredRaster::codes(raster).without_crs());

    let err = pipeline(&backend, config(scratch.path()))
        .run(&esri_job("in.tif", "out.tif"))
        .unwrap_err();

    assert_eq!(err.kind(), "invalid_input");
    assert!(err.to_string().contains("missing spatial reference"));
    assert!(!backend.contains(Path::new("out.tif")));
}

#[test]
fn test_outputs_removed_when_report_cannot_be_saved() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    backend.insert_codes("in.tif", on_lattice(3, 3, scenario::SOURCE_3X3.to_vec()));

    let output = scratch.path().join("missing-dir").join("out.tif");
    let mut job = esri_job("in.tif", output.to_str().unwrap());
    job.options.write_report = true;

    let err = pipeline(&backend, config(scratch.path())).run(&job).unwrap_err();
    assert_eq!(err.kind(), "io");
    assert_eq!(backend.paths(), vec![PathBuf::from("in.tif")]);
}

#[test]
fn test_report_written_next_to_output() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    backend.insert_codes("in.tif", on_lattice(3, 3, scenario::SOURCE_3X3.to_vec()));

    let output = scratch.path().join("out.tif");
    let mut job = esri_job("in.tif", output.to_str().unwrap());
    job.options.write_report = true;
    let report = pipeline(&backend, config(scratch.path())).run(&job).unwrap();

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(job.report_path()).unwrap()).unwrap();
    assert_eq!(saved["run_id"], report.run_id.to_string());
    assert_eq!(saved["system"], "ESRI_LULC");
    assert_eq!(saved["filled_count"], 1);

    let mut text = Vec::new();
    report.write_text(&mut text).unwrap();
    let text = String::from_utf8(text).unwrap();
    assert!(text.contains("ESRI_LULC"));
    assert!(text.contains("Filled pixels"));
}

#[test]
fn test_cancelled_run_leaves_nothing_behind() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    backend.insert_codes("in.tif", on_lattice(3, 3, scenario::SOURCE_3X3.to_vec()));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = pipeline(&backend, config(scratch.path()))
        .run_with_cancel(&esri_job("in.tif", "out.tif"), &cancel)
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(err.kind(), "cancelled");
    assert_eq!(backend.paths(), vec![PathBuf::from("in.tif")]);
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

// ============================================================================
// Grid alignment
// ============================================================================

#[test]
fn test_off_lattice_input_snapped_to_landfire() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    let (min_x, _, _, max_y) = lattice::FRONT_RANGE_BOUNDS;
    let data = create_patch_grid(20, 20, 5, &[1, 2, 7, 11]);
    backend.insert_codes("in.tif", albers_raster(20, 20, (min_x, max_y), data));

    let job = esri_job("in.tif", "out.tif").with_options(JobOptions {
        system: Some("esri".to_string()),
        align_landfire: true,
        ..Default::default()
    });
    let report = pipeline(&backend, config(scratch.path())).run(&job).unwrap();

    let check = report.alignment.unwrap();
    assert!(check.aligned);

    let stored = backend.get(Path::new("out.tif")).unwrap();
    let spec = GridAlignmentSpec::landfire_conus(30.0).unwrap();
    assert!(GridAligner::new(spec).verify(stored.grid.transform()).aligned);
    assert_eq!(stored.grid.crs(), &Crs::Epsg(5070));
    assert!(stored.grid.width() >= 20 && stored.grid.width() <= 22);

    let codes = codes_i16(&backend, "out.tif");
    assert!(codes
        .iter()
        .all(|c| [fbfm40::NODATA, fbfm40::WATER, fbfm40::TL3, fbfm40::URBAN, fbfm40::GR2].contains(c)));
    assert!(codes.iter().any(|&c| c != fbfm40::NODATA));
}

#[test]
fn test_reference_raster_lattice() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    let (min_x, _, _, max_y) = lattice::FRONT_RANGE_BOUNDS;
    let data = create_patch_grid(10, 10, 5, &[1, 2, 7, 11]);
    backend.insert_codes("in.tif", albers_raster(10, 10, (min_x, max_y), data));
    backend.insert_codes(
        "reference.tif",
        albers_raster(2, 2, (min_x + 7.5, max_y + 12.5), vec![1; 4]),
    );

    let job = esri_job("in.tif", "out.tif").with_options(JobOptions {
        system: Some("esri".to_string()),
        reference: Some(PathBuf::from("reference.tif")),
        ..Default::default()
    });
    let report = pipeline(&backend, config(scratch.path())).run(&job).unwrap();
    assert!(report.alignment.unwrap().aligned);

    let (ox, oy) = backend.get(Path::new("out.tif")).unwrap().grid.transform().origin();
    let dx = (ox - (min_x + 7.5)) / 30.0;
    let dy = (oy - (max_y + 12.5)) / 30.0;
    assert!((dx - dx.round()).abs() < 1e-6);
    assert!((dy - dy.round()).abs() < 1e-6);
}

#[test]
fn test_target_crs_must_match_reference_crs() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    backend.insert_codes("in.tif", on_lattice(3, 3, scenario::SOURCE_3X3.to_vec()));

    let job = esri_job("in.tif", "out.tif").with_options(JobOptions {
        system: Some("esri".to_string()),
        target_crs: Some(crs::WGS84.to_string()),
        align_landfire: true,
        ..Default::default()
    });
    let err = pipeline(&backend, config(scratch.path())).run(&job).unwrap_err();
    assert_eq!(err.kind(), "config");
    assert!(!backend.contains(Path::new("out.tif")));
}

#[test]
fn test_explicit_target_crs_without_lattice() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    let data = create_patch_grid(10, 10, 5, &[1, 2, 7, 11]);
    backend.insert_codes("in.tif", on_lattice(10, 10, data));

    let job = esri_job("in.tif", "out.tif").with_options(JobOptions {
        system: Some("esri".to_string()),
        target_crs: Some(crs::WEB_MERCATOR.to_string()),
        resolution: Some(40.0),
        ..Default::default()
    });
    let report = pipeline(&backend, config(scratch.path())).run(&job).unwrap();

    assert!(report.alignment.is_none());
    assert_eq!(report.crs, Crs::Epsg(3857));
    let stored = backend.get(Path::new("out.tif")).unwrap();
    assert_eq!(stored.grid.transform().pixel_width(), 40.0);
    assert_eq!(
        backend.spatial_reference(Path::new("out_confidence.tif")).unwrap(),
        Some(Crs::Epsg(3857))
    );
}

#[test]
fn test_lattice_target_crs_may_be_spelled_out() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    backend.insert_codes("in.tif", on_lattice(3, 3, scenario::SOURCE_3X3.to_vec()));

    let job = esri_job("in.tif", "out.tif").with_options(JobOptions {
        system: Some("esri".to_string()),
        target_crs: Some(crs::CONUS_ALBERS.to_string()),
        align_landfire: true,
        ..Default::default()
    });
    let report = pipeline(&backend, config(scratch.path())).run(&job).unwrap();
    assert!(report.alignment.unwrap().aligned);
    assert_eq!(report.width, 3);
    assert_eq!(report.height, 3);
}

// ============================================================================
// Batch
// ============================================================================

#[tokio::test]
async fn test_batch_reports_each_job() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    backend.insert_codes("a.tif", on_lattice(3, 3, scenario::SOURCE_3X3.to_vec()));
    backend.insert_codes("b.tif", on_lattice(4, 4, create_patch_grid(4, 4, 2, &[12, 13])));

    let jobs = vec![
        esri_job("a.tif", "a_out.tif"),
        JobSpec::new("b.tif", "b_out.tif"),
        esri_job("missing.tif", "c_out.tif"),
    ];
    let pipeline = Arc::new(pipeline(&backend, config(scratch.path())));
    let summary = run_batch(pipeline, jobs).await;

    assert_eq!(summary.outcomes.len(), 3);
    assert_eq!(summary.succeeded(), 1);
    assert_eq!(summary.failed(), 2);
    assert!(matches!(summary.outcomes[0].status, JobStatus::Succeeded { .. }));
    assert!(matches!(
        &summary.outcomes[1].status,
        JobStatus::Failed { kind, .. } if kind == "needs_review"
    ));
    assert!(matches!(
        &summary.outcomes[2].status,
        JobStatus::Failed { kind, .. } if kind == "backend"
    ));
    assert!(backend.contains(Path::new("a_out.tif")));
    assert!(!backend.contains(Path::new("b_out.tif")));
}

#[tokio::test]
async fn test_batch_respects_single_slot() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    let mut jobs = Vec::new();
    for i in 0..4 {
        let input = format!("in_{}.tif", i);
        backend.insert_codes(input.as_str(), on_lattice(3, 3, scenario::SOURCE_3X3.to_vec()));
        jobs.push(esri_job(&input, &format!("out_{}.tif", i)));
    }

    let mut config = config(scratch.path());
    config.max_concurrent_jobs = 1;
    let summary = run_batch(Arc::new(pipeline(&backend, config)), jobs).await;

    assert_eq!(summary.succeeded(), 4);
    let inputs: Vec<_> = summary.outcomes.iter().map(|o| o.input.clone()).collect();
    assert_eq!(inputs[3], PathBuf::from("in_3.tif"));
    for i in 0..4 {
        assert_codes_eq!(&codes_i16(&backend, &format!("out_{}.tif", i)), &scenario::FILLED_3X3, 3);
    }
}

#[tokio::test]
async fn test_timed_out_jobs_keep_their_slot_until_stopped() {
    let scratch = tempfile::tempdir().unwrap();
    let backend = SimulatedBackend::new();
    backend.slow_writes(Duration::from_millis(100));
    let mut jobs = Vec::new();
    for i in 0..5 {
        let input = format!("in_{}.tif", i);
        let codes = create_patch_grid(3, 30, 3, &[1, 2, 7, 11]);
        backend.insert_codes(input.as_str(), on_lattice(3, 30, codes));
        jobs.push(esri_job(&input, &format!("out_{}.tif", i)));
    }

    // 30 one-row blocks at 100 ms each outlast the 1 s budget.
    let mut config = config(scratch.path());
    config.max_concurrent_jobs = 2;
    config.job_timeout_secs = 1;
    config.processor.block_rows = 1;
    let summary = run_batch(Arc::new(pipeline(&backend, config)), jobs).await;

    assert_eq!(summary.outcomes.len(), 5);
    assert!(summary
        .outcomes
        .iter()
        .all(|o| matches!(o.status, JobStatus::TimedOut)));
    assert!(backend.peak_concurrent_writes() <= 2);
    let mut paths = backend.paths();
    paths.sort();
    let inputs: Vec<_> = (0..5).map(|i| PathBuf::from(format!("in_{}.tif", i))).collect();
    assert_eq!(paths, inputs);
}
