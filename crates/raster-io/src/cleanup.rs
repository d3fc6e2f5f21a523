//! Removal of intermediate rasters.
//!
//! Cleanup runs whether the pipeline succeeded or not, so it never fails
//! itself: problems are collected and reported as warnings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::RasterBackend;

/// What a cleanup pass removed and what it could not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    /// Already gone before cleanup ran.
    pub missing: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|(path, reason)| format!("could not remove {}: {}", path.display(), reason))
            .collect()
    }

    /// Fold another pass into this one.
    pub fn merge(&mut self, other: CleanupReport) {
        self.removed.extend(other.removed);
        self.missing.extend(other.missing);
        self.failures.extend(other.failures);
    }
}

/// Remove every path through `backend`.
pub fn cleanup<P: AsRef<Path>>(backend: &dyn RasterBackend, paths: &[P]) -> CleanupReport {
    let mut report = CleanupReport::default();
    for path in paths {
        let path = path.as_ref();
        match backend.remove(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed intermediate");
                report.removed.push(path.to_path_buf());
            }
            Err(e) if e.is_not_found() => report.missing.push(path.to_path_buf()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove intermediate");
                report.failures.push((path.to_path_buf(), e.to_string()));
            }
        }
    }
    report
}

/// Remove a scratch directory and everything in it.
pub fn remove_scratch_dir(dir: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();
    match std::fs::remove_dir_all(dir) {
        Ok(()) => report.removed.push(dir.to_path_buf()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            report.missing.push(dir.to_path_buf())
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to remove scratch directory");
            report.failures.push((dir.to_path_buf(), e.to_string()));
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedBackend;
    use landcover_common::{Crs, GeoTransform, GridGeometry, MemoryRaster, PixelType, RasterGrid};

    fn tiny() -> MemoryRaster<i32> {
        let geometry = GridGeometry::new(
            2,
            2,
            GeoTransform::from_origin(0.0, 60.0, 30.0, 30.0),
            Crs::Epsg(5070),
        )
        .unwrap();
        MemoryRaster::new(RasterGrid::new(geometry, None, PixelType::I16), vec![1, 2, 3, 4]).unwrap()
    }

    #[test]
    fn test_cleanup_sorts_outcomes() {
        let backend = SimulatedBackend::new();
        backend.insert_codes("a.tif", tiny());
        backend.insert_codes("locked.tif", tiny());
        backend.refuse_removal("locked.tif");

        let report = cleanup(&backend, &["a.tif", "gone.tif", "locked.tif"]);
        assert_eq!(report.removed, vec![PathBuf::from("a.tif")]);
        assert_eq!(report.missing, vec![PathBuf::from("gone.tif")]);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_clean());
        assert!(report.warnings()[0].contains("locked.tif"));
    }

    #[test]
    fn test_remove_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(scratch.join("nested")).unwrap();
        std::fs::write(scratch.join("nested/x.tif"), b"x").unwrap();

        let mut report = remove_scratch_dir(&scratch);
        assert!(report.is_clean());
        assert!(!scratch.exists());

        report.merge(remove_scratch_dir(&scratch));
        assert_eq!(report.missing, vec![scratch]);
    }
}
