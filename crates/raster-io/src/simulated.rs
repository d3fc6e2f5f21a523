//! In-memory backend for tests and dry runs.
//!
//! Rasters live in a map keyed by path. Behaviour is deterministic, and a
//! few faults can be injected: the next writes can be stored under the
//! wrong CRS, chosen paths can refuse removal, and writes can be slowed
//! down block by block.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use class_mapping::MappingTable;
use landcover_common::{
    block_windows, BlockProducer, BoundingBox, Crs, GridGeometry, MemoryRaster, PixelType,
    RasterError, RasterGrid, CODE_NODATA, CONFIDENCE_NODATA,
};
use projection::Reprojector;
use tracing::{debug, warn};

use crate::backend::{
    convert_source, footprint_bounds, ConversionReport, RasterBackend, RasterValidation,
    SourceHandle, SystemInfo, WriteReport,
};
use crate::error::{BackendError, BackendResult};

/// Pixels of a stored raster.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredData {
    Codes(Vec<i32>),
    Confidence(Vec<f32>),
}

impl StoredData {
    fn byte_len(&self) -> u64 {
        match self {
            Self::Codes(v) => (v.len() * 2) as u64,
            Self::Confidence(v) => (v.len() * 4) as u64,
        }
    }
}

/// One raster held by [`SimulatedBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRaster {
    pub grid: RasterGrid,
    /// CRS reported by `spatial_reference`; `None` simulates a file with
    /// no georeferencing keys.
    pub declared_crs: Option<Crs>,
    pub data: StoredData,
    pub band_count: usize,
}

impl StoredRaster {
    pub fn codes(raster: MemoryRaster<i32>) -> Self {
        let (grid, data) = raster.into_parts();
        Self {
            declared_crs: Some(grid.crs().clone()),
            grid,
            data: StoredData::Codes(data),
            band_count: 1,
        }
    }

    pub fn without_crs(mut self) -> Self {
        self.declared_crs = None;
        self
    }
}

#[derive(Debug, Default)]
struct Faults {
    /// Wrong CRS and how many more writes get it.
    crs_drift: Option<(Crs, usize)>,
    sticky_paths: BTreeSet<PathBuf>,
    block_delay: Option<Duration>,
}

/// Writes in flight, and the most seen at once.
#[derive(Debug, Default)]
struct WriteGauge {
    active: usize,
    peak: usize,
}

#[derive(Debug, Default)]
struct State {
    rasters: BTreeMap<PathBuf, StoredRaster>,
    faults: Faults,
    writes: WriteGauge,
}

/// [`RasterBackend`] backed by memory.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackend {
    state: Arc<Mutex<State>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, path: impl Into<PathBuf>, raster: StoredRaster) {
        self.lock().rasters.insert(path.into(), raster);
    }

    pub fn insert_codes(&self, path: impl Into<PathBuf>, raster: MemoryRaster<i32>) {
        self.insert(path, StoredRaster::codes(raster));
    }

    pub fn get(&self, path: &Path) -> Option<StoredRaster> {
        self.lock().rasters.get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().rasters.contains_key(path)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().rasters.keys().cloned().collect()
    }

    /// Stored codes of a raster.
    pub fn codes(&self, path: &Path) -> BackendResult<Vec<i32>> {
        match self.stored(path)?.data {
            StoredData::Codes(v) => Ok(v),
            StoredData::Confidence(_) => {
                Err(BackendError::unsupported(path, "holds confidence"))
            }
        }
    }

    /// Stored confidence of a raster.
    pub fn confidence(&self, path: &Path) -> BackendResult<Vec<f32>> {
        match self.stored(path)?.data {
            StoredData::Confidence(v) => Ok(v),
            StoredData::Codes(_) => Err(BackendError::unsupported(path, "holds class codes")),
        }
    }

    /// Store the next `writes` outputs under `crs` instead of their own.
    pub fn inject_crs_drift(&self, crs: Crs, writes: usize) {
        self.lock().faults.crs_drift = Some((crs, writes));
    }

    /// Make removal of `path` fail.
    pub fn refuse_removal(&self, path: impl Into<PathBuf>) {
        self.lock().faults.sticky_paths.insert(path.into());
    }

    /// Sleep for `delay` before pulling each block of a write.
    pub fn slow_writes(&self, delay: Duration) {
        self.lock().faults.block_delay = Some(delay);
    }

    /// Most writes that were ever in progress at the same time.
    pub fn peak_concurrent_writes(&self) -> usize {
        self.lock().writes.peak
    }

    /// Drain `producer` over `geometry`, tracking the write in the gauge.
    fn pull<T>(
        &self,
        geometry: &GridGeometry,
        producer: &mut dyn BlockProducer<T>,
        block_rows: usize,
    ) -> BackendResult<(Vec<T>, usize)> {
        let delay = {
            let mut state = self.lock();
            state.writes.active += 1;
            state.writes.peak = state.writes.peak.max(state.writes.active);
            state.faults.block_delay
        };
        let pulled = pull(geometry, producer, block_rows, delay);
        self.lock().writes.active -= 1;
        pulled
    }

    fn stored(&self, path: &Path) -> BackendResult<StoredRaster> {
        self.get(path).ok_or_else(|| BackendError::not_found(path))
    }

    fn store(
        &self,
        path: &Path,
        geometry: &GridGeometry,
        data: StoredData,
        nodata: f64,
        pixel_type: PixelType,
    ) -> WriteReport {
        let mut state = self.lock();
        let mut declared = geometry.crs.clone();
        if let Some((crs, remaining)) = state.faults.crs_drift.take() {
            warn!(path = %path.display(), crs = %crs, "Injecting CRS drift");
            declared = crs.clone();
            if remaining > 1 {
                state.faults.crs_drift = Some((crs, remaining - 1));
            }
        }

        let bytes = data.byte_len();
        let raster = StoredRaster {
            grid: RasterGrid::new(geometry.clone(), Some(nodata), pixel_type),
            declared_crs: Some(declared),
            data,
            band_count: 1,
        };
        state.rasters.insert(path.to_path_buf(), raster);
        WriteReport {
            path: path.to_path_buf(),
            width: geometry.width,
            height: geometry.height,
            blocks: 0,
            bytes,
        }
    }
}

fn pull<T>(
    geometry: &GridGeometry,
    producer: &mut dyn BlockProducer<T>,
    block_rows: usize,
    delay: Option<Duration>,
) -> BackendResult<(Vec<T>, usize)> {
    let windows = block_windows(geometry.width, geometry.height, block_rows.max(1), geometry.width);
    let mut out = Vec::with_capacity(geometry.pixel_count());
    for window in &windows {
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let block = producer.produce(window)?;
        RasterError::check_len(window.pixel_count(), block.len())?;
        out.extend(block);
    }
    Ok((out, windows.len()))
}

impl RasterBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn validate(&self, path: &Path) -> BackendResult<RasterValidation> {
        let stored = self.stored(path)?;
        let grid = &stored.grid;
        Ok(RasterValidation::new(
            path,
            grid.width(),
            grid.height(),
            stored.band_count,
            grid.pixel_type,
            stored.declared_crs.clone(),
            grid.nodata,
            Some(*grid.transform()),
            stored.data.byte_len(),
        ))
    }

    fn convert_to_optimized_format(
        &self,
        input: &Path,
        output: &Path,
        table: Option<Arc<MappingTable>>,
        block_rows: usize,
    ) -> BackendResult<ConversionReport> {
        convert_source(self, self.open(input)?, output, table, block_rows)
    }

    fn system_info(&self) -> SystemInfo {
        SystemInfo::new(self.name(), &["memory"])
    }

    fn bounds(&self, path: &Path, reprojector: &Reprojector) -> BackendResult<BoundingBox> {
        let mut source = self.open(path)?;
        footprint_bounds(&mut source, reprojector, usize::MAX, path)
    }

    fn open(&self, path: &Path) -> BackendResult<SourceHandle> {
        let stored = self.stored(path)?;
        let crs = stored
            .declared_crs
            .ok_or_else(|| BackendError::missing_spatial_reference(path))?;
        let StoredData::Codes(data) = stored.data else {
            return Err(BackendError::unsupported(
                path,
                "confidence rasters cannot be opened as codes",
            ));
        };
        let geometry = GridGeometry { crs, ..stored.grid.geometry.clone() };
        let grid = stored.grid.with_geometry(geometry);
        debug!(path = %path.display(), "Opened simulated raster");
        Ok(Box::new(MemoryRaster::new(grid, data)?))
    }

    fn write_codes(
        &self,
        path: &Path,
        geometry: &GridGeometry,
        producer: &mut dyn BlockProducer<i16>,
        block_rows: usize,
    ) -> BackendResult<WriteReport> {
        let (codes, blocks) = self.pull(geometry, producer, block_rows)?;
        let data = StoredData::Codes(codes.into_iter().map(i32::from).collect());
        let report = self.store(path, geometry, data, CODE_NODATA as f64, PixelType::I16);
        Ok(WriteReport { blocks, ..report })
    }

    fn write_confidence(
        &self,
        path: &Path,
        geometry: &GridGeometry,
        producer: &mut dyn BlockProducer<f32>,
        block_rows: usize,
    ) -> BackendResult<WriteReport> {
        let (confidence, blocks) = self.pull(geometry, producer, block_rows)?;
        let data = StoredData::Confidence(confidence);
        let report = self.store(path, geometry, data, CONFIDENCE_NODATA as f64, PixelType::F32);
        Ok(WriteReport { blocks, ..report })
    }

    fn spatial_reference(&self, path: &Path) -> BackendResult<Option<Crs>> {
        Ok(self.stored(path)?.declared_crs)
    }

    fn set_spatial_reference(&self, path: &Path, crs: &Crs) -> BackendResult<()> {
        let mut state = self.lock();
        let stored = state
            .rasters
            .get_mut(path)
            .ok_or_else(|| BackendError::not_found(path))?;
        stored.declared_crs = Some(crs.clone());
        stored.grid.geometry.crs = crs.clone();
        Ok(())
    }

    fn remove(&self, path: &Path) -> BackendResult<()> {
        let mut state = self.lock();
        if state.faults.sticky_paths.contains(path) {
            return Err(BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("{} is locked", path.display()),
            )));
        }
        state
            .rasters
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BackendError::not_found(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landcover_common::GeoTransform;

    fn raster() -> MemoryRaster<i32> {
        let geometry = GridGeometry::new(
            3,
            2,
            GeoTransform::from_origin(0.0, 60.0, 30.0, 30.0),
            Crs::Epsg(5070),
        )
        .unwrap();
        let grid = RasterGrid::new(geometry, Some(0.0), PixelType::U8);
        MemoryRaster::new(grid, vec![1, 2, 0, 7, 7, 11]).unwrap()
    }

    #[test]
    fn test_write_then_read_codes() {
        let backend = SimulatedBackend::new();
        let source = raster();
        let geometry = source.grid().geometry.clone();
        let mut codes = MemoryRaster::new(
            source.grid().clone(),
            vec![98i16, 183, -9999, 91, 91, 102],
        )
        .unwrap();

        let report = backend
            .write_codes(Path::new("out.tif"), &geometry, &mut codes, 1)
            .unwrap();
        assert_eq!(report.blocks, 2);
        assert_eq!(
            backend.codes(Path::new("out.tif")).unwrap(),
            vec![98, 183, -9999, 91, 91, 102]
        );
        let stored = backend.get(Path::new("out.tif")).unwrap();
        assert_eq!(stored.grid.nodata, Some(-9999.0));
        assert_eq!(stored.grid.pixel_type, PixelType::I16);
    }

    #[test]
    fn test_crs_drift_applies_to_next_writes_only() {
        let backend = SimulatedBackend::new();
        backend.inject_crs_drift(Crs::Epsg(3857), 1);
        let source = raster();
        let geometry = source.grid().geometry.clone();
        let mut conf = MemoryRaster::new(source.grid().clone(), vec![0.5f32; 6]).unwrap();

        backend.write_confidence(Path::new("a.tif"), &geometry, &mut conf, 2).unwrap();
        backend.write_confidence(Path::new("b.tif"), &geometry, &mut conf, 2).unwrap();

        assert_eq!(backend.spatial_reference(Path::new("a.tif")).unwrap(), Some(Crs::Epsg(3857)));
        assert_eq!(backend.spatial_reference(Path::new("b.tif")).unwrap(), Some(Crs::Epsg(5070)));

        backend.set_spatial_reference(Path::new("a.tif"), &Crs::Epsg(5070)).unwrap();
        assert_eq!(backend.spatial_reference(Path::new("a.tif")).unwrap(), Some(Crs::Epsg(5070)));
    }

    #[test]
    fn test_slow_writes_are_gauged() {
        let backend = SimulatedBackend::new();
        backend.slow_writes(Duration::from_millis(1));
        let source = raster();
        let geometry = source.grid().geometry.clone();
        let mut conf = MemoryRaster::new(source.grid().clone(), vec![0.5f32; 6]).unwrap();

        assert_eq!(backend.peak_concurrent_writes(), 0);
        backend.write_confidence(Path::new("a.tif"), &geometry, &mut conf, 1).unwrap();
        backend.write_confidence(Path::new("b.tif"), &geometry, &mut conf, 1).unwrap();
        assert_eq!(backend.peak_concurrent_writes(), 1);
    }

    #[test]
    fn test_open_without_crs_fails() {
        let backend = SimulatedBackend::new();
        backend.insert("bare.tif", StoredRaster::codes(raster()).without_crs());
        assert!(matches!(
            backend.open(Path::new("bare.tif")),
            Err(BackendError::MissingSpatialReference(_))
        ));
        let v = backend.validate(Path::new("bare.tif")).unwrap();
        assert!(!v.is_usable());
    }

    #[test]
    fn test_remove_and_refusal() {
        let backend = SimulatedBackend::new();
        backend.insert_codes("a.tif", raster());
        backend.insert_codes("b.tif", raster());
        backend.refuse_removal("b.tif");

        assert!(backend.remove(Path::new("a.tif")).is_ok());
        assert!(backend.remove(Path::new("a.tif")).unwrap_err().is_not_found());
        assert!(backend.remove(Path::new("b.tif")).is_err());
        assert!(backend.contains(Path::new("b.tif")));
    }
}
