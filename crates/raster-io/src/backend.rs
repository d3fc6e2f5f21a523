//! The capability contract every raster backend provides.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use class_mapping::MappingTable;
use class_processor::{RemapOptions, RemapStage, RemapTally};
use landcover_common::{
    block_windows, BlockProducer, BlockWindow, BoundingBox, Crs, GeoTransform, GridGeometry,
    PixelType, RasterError, RasterGrid, RasterResult, RasterSource, SourceBlocks, CODE_NODATA,
};
use projection::Reprojector;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};

/// Files above this size get a warning.
pub const LARGE_FILE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Projected pixel sizes above this many metres get a warning.
pub const COARSE_RESOLUTION_M: f64 = 1000.0;

/// A readable raster handed out by a backend.
pub type SourceHandle = Box<dyn RasterSource + Send>;

/// Summary of an input raster and anything odd about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterValidation {
    pub path: PathBuf,
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub pixel_type: PixelType,
    pub crs: Option<Crs>,
    pub nodata: Option<f64>,
    pub transform: Option<GeoTransform>,
    pub file_size: u64,
    pub warnings: Vec<String>,
}

impl RasterValidation {
    /// Build the summary and derive its warnings.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        path: &Path,
        width: usize,
        height: usize,
        band_count: usize,
        pixel_type: PixelType,
        crs: Option<Crs>,
        nodata: Option<f64>,
        transform: Option<GeoTransform>,
        file_size: u64,
    ) -> Self {
        let mut v = Self {
            path: path.to_path_buf(),
            width,
            height,
            band_count,
            pixel_type,
            crs,
            nodata,
            transform,
            file_size,
            warnings: Vec::new(),
        };
        v.warnings = v.collect_warnings();
        v
    }

    fn collect_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.crs.is_none() {
            warnings.push("no coordinate reference system".to_string());
        }
        if self.nodata.is_none() {
            warnings.push("no no-data value set".to_string());
        }
        if self.file_size > LARGE_FILE_BYTES {
            warnings.push(format!(
                "large file ({:.1} GiB), processing may be slow",
                self.file_size as f64 / (1024.0 * 1024.0 * 1024.0)
            ));
        }
        let projected = self.crs.as_ref().is_some_and(|c| !c.is_geographic());
        if let Some(t) = self.transform.filter(|_| projected) {
            let size = t.a.abs().max(t.e.abs());
            if size > COARSE_RESOLUTION_M {
                warnings.push(format!("coarse resolution: {} m pixels", size));
            }
        }
        if !self.pixel_type.is_integer() {
            warnings.push(format!(
                "{} samples; class codes are expected to be integers",
                self.pixel_type
            ));
        }
        if self.band_count > 1 {
            warnings.push(format!(
                "{} bands; only the first is processed",
                self.band_count
            ));
        }
        warnings
    }

    /// Problems that stop processing outright.
    pub fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.crs.is_none() {
            errors.push("missing spatial reference".to_string());
        }
        if !self.pixel_type.is_integer() {
            errors.push(format!("unsupported pixel type {}", self.pixel_type));
        }
        if self.transform.is_none() {
            errors.push("missing georeferencing transform".to_string());
        }
        errors
    }

    pub fn is_usable(&self) -> bool {
        self.errors().is_empty()
    }
}

/// Version and host details for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub backend: String,
    pub version: String,
    pub formats: Vec<String>,
    pub projection_engine: String,
    pub cpu_count: usize,
    pub os: String,
    pub arch: String,
}

impl SystemInfo {
    pub fn new(backend: &str, formats: &[&str]) -> Self {
        Self {
            backend: backend.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            formats: formats.iter().map(|f| f.to_string()).collect(),
            projection_engine: "proj4rs".to_string(),
            cpu_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// What one write produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteReport {
    pub path: PathBuf,
    pub width: usize,
    pub height: usize,
    pub blocks: usize,
    pub bytes: u64,
}

/// Result of [`RasterBackend::convert_to_optimized_format`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionReport {
    pub write: WriteReport,
    /// Present when a table was applied on the way.
    pub remap: Option<RemapTally>,
}

/// Storage-specific raster operations.
///
/// The pipeline only talks to this trait; file-backed and in-memory
/// implementations are injected at construction.
pub trait RasterBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Describe an input and list what looks wrong with it.
    fn validate(&self, path: &Path) -> BackendResult<RasterValidation>;

    /// Rewrite an input as deflate-compressed `i16` strips, remapping
    /// through `table` when one is given.
    fn convert_to_optimized_format(
        &self,
        input: &Path,
        output: &Path,
        table: Option<Arc<MappingTable>>,
        block_rows: usize,
    ) -> BackendResult<ConversionReport>;

    fn system_info(&self) -> SystemInfo;

    /// Extent of the non-no-data pixels in WGS84 degrees.
    fn bounds(&self, path: &Path, reprojector: &Reprojector) -> BackendResult<BoundingBox>;

    fn open(&self, path: &Path) -> BackendResult<SourceHandle>;

    /// Pull `i16` codes window by window and store them with no-data -9999.
    fn write_codes(
        &self,
        path: &Path,
        geometry: &GridGeometry,
        producer: &mut dyn BlockProducer<i16>,
        block_rows: usize,
    ) -> BackendResult<WriteReport>;

    /// Pull `f32` confidence window by window and store it with no-data 0.
    fn write_confidence(
        &self,
        path: &Path,
        geometry: &GridGeometry,
        producer: &mut dyn BlockProducer<f32>,
        block_rows: usize,
    ) -> BackendResult<WriteReport>;

    /// The CRS stored with a raster, if any.
    fn spatial_reference(&self, path: &Path) -> BackendResult<Option<Crs>>;

    /// Replace the CRS stored with a raster, leaving its pixels alone.
    fn set_spatial_reference(&self, path: &Path, crs: &Crs) -> BackendResult<()>;

    /// Delete a raster. Missing rasters report [`BackendError::NotFound`].
    fn remove(&self, path: &Path) -> BackendResult<()>;
}

/// Codes narrowed to `i16`, with source no-data becoming -9999.
pub struct NarrowCodes<P> {
    upstream: P,
    nodata: Option<i32>,
}

impl<P: BlockProducer<i32>> NarrowCodes<P> {
    pub fn new(upstream: P, nodata: Option<i32>) -> Self {
        Self { upstream, nodata }
    }
}

impl<P: BlockProducer<i32>> BlockProducer<i16> for NarrowCodes<P> {
    fn produce(&mut self, window: &BlockWindow) -> RasterResult<Vec<i16>> {
        self.upstream
            .produce(window)?
            .into_iter()
            .map(|code| {
                if Some(code) == self.nodata {
                    return Ok(CODE_NODATA);
                }
                i16::try_from(code).map_err(|_| RasterError::ValueOutOfRange {
                    value: code.to_string(),
                    pixel_type: PixelType::I16.to_string(),
                })
            })
            .collect()
    }
}

/// Shared body of [`RasterBackend::convert_to_optimized_format`].
pub(crate) fn convert_source<B: RasterBackend + ?Sized>(
    backend: &B,
    source: SourceHandle,
    output: &Path,
    table: Option<Arc<MappingTable>>,
    block_rows: usize,
) -> BackendResult<ConversionReport> {
    let geometry = source.grid().geometry.clone();
    let nodata = source.grid().nodata_code();

    match table {
        Some(table) => {
            let options = RemapOptions {
                source_nodata: nodata,
                ..Default::default()
            };
            let mut stage = RemapStage::new(SourceBlocks(source), table, &options);
            let write = backend.write_codes(output, &geometry, &mut stage, block_rows)?;
            Ok(ConversionReport {
                write,
                remap: Some(stage.into_tally()),
            })
        }
        None => {
            let mut narrow = NarrowCodes::new(SourceBlocks(source), nodata);
            let write = backend.write_codes(output, &geometry, &mut narrow, block_rows)?;
            Ok(ConversionReport { write, remap: None })
        }
    }
}

/// Sampled data footprint of a source, transformed to WGS84.
///
/// Rows and columns are visited with a stride chosen so that at most about
/// `max_samples` pixels are inspected.
pub fn footprint_bounds<S: RasterSource + ?Sized>(
    source: &mut S,
    reprojector: &Reprojector,
    max_samples: usize,
    label: &Path,
) -> BackendResult<BoundingBox> {
    let grid: RasterGrid = source.grid().clone();
    let (width, height) = (grid.width(), grid.height());
    let nodata = grid.nodata_code();
    let step = ((width * height) as f64 / max_samples.max(1) as f64)
        .sqrt()
        .ceil()
        .max(1.0) as usize;

    let mut extent: Option<(usize, usize, usize, usize)> = None;
    for window in block_windows(width, height, 1, width).into_iter().step_by(step) {
        let row = window.row_off;
        let codes = source.read_window(&window)?;
        for col in (0..width).step_by(step) {
            if Some(codes[col]) == nodata {
                continue;
            }
            extent = Some(match extent {
                None => (col, row, col, row),
                Some((c0, r0, c1, r1)) => (c0.min(col), r0.min(row), c1.max(col), r1.max(row)),
            });
        }
    }

    let (c0, r0, c1, r1) =
        extent.ok_or_else(|| BackendError::EmptyFootprint(label.display().to_string()))?;
    // Widen by the stride so skipped pixels next to the samples are covered.
    let c1 = (c1 + step).min(width);
    let r1 = (r1 + step).min(height);
    let c0 = c0.saturating_sub(step - 1);
    let r0 = r0.saturating_sub(step - 1);

    let geometry = GridGeometry::new(
        c1 - c0,
        r1 - r0,
        GeoTransform::from_origin(
            grid.transform().c + c0 as f64 * grid.transform().a,
            grid.transform().f + r0 as f64 * grid.transform().e,
            grid.transform().a,
            grid.transform().e,
        ),
        grid.crs().clone(),
    )?;
    Ok(reprojector.transform_bounds(&geometry, &Crs::Epsg(4326))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validation(crs: Option<Crs>, pixel_type: PixelType, bands: usize, size: u64) -> RasterValidation {
        RasterValidation::new(
            Path::new("in.tif"),
            10,
            10,
            bands,
            pixel_type,
            crs,
            None,
            Some(GeoTransform::from_origin(0.0, 0.0, 2000.0, 2000.0)),
            size,
        )
    }

    #[test]
    fn test_warnings_cover_every_check() {
        let v = validation(None, PixelType::F32, 3, LARGE_FILE_BYTES + 1);
        let text = v.warnings.join("\n");
        assert!(text.contains("no coordinate reference system"));
        assert!(text.contains("no no-data"));
        assert!(text.contains("large file"));
        assert!(text.contains("float32"));
        assert!(text.contains("3 bands"));
        assert!(!v.is_usable());
    }

    #[test]
    fn test_coarse_resolution_only_for_projected() {
        let projected = validation(Some(Crs::Epsg(5070)), PixelType::U8, 1, 10);
        assert!(projected.warnings.iter().any(|w| w.contains("coarse")));
        assert!(projected.is_usable());

        let geographic = validation(Some(Crs::Epsg(4326)), PixelType::U8, 1, 10);
        assert!(!geographic.warnings.iter().any(|w| w.contains("coarse")));
    }

    #[test]
    fn test_system_info() {
        let info = SystemInfo::new("test", &["GTiff"]);
        assert_eq!(info.backend, "test");
        assert!(info.cpu_count >= 1);
        assert_eq!(info.formats, vec!["GTiff".to_string()]);
    }
}
