//! Snapping raster extents onto a reference lattice.
//!
//! A reference lattice is an origin plus a cell size. Every aligned raster
//! has its upper-left corner on a lattice node, so pixels from different
//! products line up exactly. The working resolution of the output may
//! differ from the lattice cell size (e.g. 10 m work on a 30 m lattice).

use landcover_common::crs::EPSG_CONUS_ALBERS;
use landcover_common::{BoundingBox, Crs, GeoTransform, GridGeometry};
use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, Result};

/// LANDFIRE CONUS grid origin (upper-left) in EPSG:5070.
pub const LANDFIRE_ORIGIN: (f64, f64) = (-2362425.0, 3310005.0);

/// LANDFIRE cell size in meters.
pub const LANDFIRE_CELL_SIZE: f64 = 30.0;

/// Fraction of a cell within which a coordinate counts as on the lattice.
const SNAP_EPSILON: f64 = 1e-9;

/// Reference lattice and working resolution for an aligned output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridAlignmentSpec {
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell_size: f64,
    pub resolution: f64,
}

impl GridAlignmentSpec {
    pub fn new(origin_x: f64, origin_y: f64, cell_size: f64, resolution: f64) -> Result<Self> {
        let spec = Self {
            origin_x,
            origin_y,
            cell_size,
            resolution,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// The LANDFIRE CONUS 30 m lattice at the given working resolution.
    pub fn landfire_conus(resolution: f64) -> Result<Self> {
        Self::new(LANDFIRE_ORIGIN.0, LANDFIRE_ORIGIN.1, LANDFIRE_CELL_SIZE, resolution)
    }

    /// Lattice taken from a reference raster's origin and pixel size.
    /// The lattice is square, so the reference pixels must be too.
    pub fn from_reference(reference: &GridGeometry, resolution: Option<f64>) -> Result<Self> {
        let (ox, oy) = reference.transform.origin();
        let cell = reference.transform.pixel_width();
        let height = reference.transform.pixel_height();
        if (cell - height).abs() > cell * SNAP_EPSILON {
            return Err(ProjectionError::invalid_alignment(format!(
                "reference pixels are not square ({} x {})",
                cell, height
            )));
        }
        Self::new(ox, oy, cell, resolution.unwrap_or(cell))
    }

    /// CRS the LANDFIRE lattice is defined in.
    pub fn landfire_crs() -> Crs {
        Crs::Epsg(EPSG_CONUS_ALBERS)
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [self.origin_x, self.origin_y, self.cell_size, self.resolution]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(ProjectionError::invalid_alignment("non-finite lattice parameter"));
        }
        if self.cell_size <= 0.0 {
            return Err(ProjectionError::invalid_alignment(format!(
                "cell size must be > 0, got {}",
                self.cell_size
            )));
        }
        if self.resolution <= 0.0 {
            return Err(ProjectionError::invalid_alignment(format!(
                "resolution must be > 0, got {}",
                self.resolution
            )));
        }
        Ok(())
    }
}

/// Output of [`GridAligner::align_bounds`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignedGrid {
    pub bounds: BoundingBox,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
}

impl AlignedGrid {
    /// Attach a CRS to produce a full grid geometry.
    pub fn into_geometry(self, crs: Crs) -> Result<GridGeometry> {
        Ok(GridGeometry::new(self.width, self.height, self.transform, crs)?)
    }
}

/// Residual of a transform origin against the lattice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentCheck {
    pub offset_x: f64,
    pub offset_y: f64,
    pub tolerance: f64,
    pub aligned: bool,
}

/// Snaps extents to a [`GridAlignmentSpec`].
#[derive(Debug, Clone, Copy)]
pub struct GridAligner {
    spec: GridAlignmentSpec,
    tolerance: f64,
}

impl GridAligner {
    pub fn new(spec: GridAlignmentSpec) -> Self {
        Self {
            tolerance: spec.cell_size * 1e-6,
            spec,
        }
    }

    pub fn spec(&self) -> &GridAlignmentSpec {
        &self.spec
    }

    /// Expand `bounds` outward to the lattice and size the output grid.
    ///
    /// Min edges are floored and max edges ceiled to lattice nodes, so the
    /// result always contains the input. Width and height count working
    /// resolution cells covering the aligned extent.
    pub fn align_bounds(&self, bounds: &BoundingBox) -> Result<AlignedGrid> {
        if !bounds.is_valid() {
            return Err(ProjectionError::invalid_alignment(format!(
                "inverted bounds {:?}",
                bounds
            )));
        }

        let cell = self.spec.cell_size;
        let (ox, oy) = (self.spec.origin_x, self.spec.origin_y);

        let min_x = ox + snap_floor((bounds.min_x - ox) / cell) * cell;
        let max_x = ox + snap_ceil((bounds.max_x - ox) / cell) * cell;
        let min_y = oy + snap_floor((bounds.min_y - oy) / cell) * cell;
        let max_y = oy + snap_ceil((bounds.max_y - oy) / cell) * cell;

        let res = self.spec.resolution;
        let width = cell_count(max_x - min_x, res).max(1);
        let height = cell_count(max_y - min_y, res).max(1);

        Ok(AlignedGrid {
            bounds: BoundingBox::new(min_x, min_y, max_x, max_y),
            transform: GeoTransform::from_origin(min_x, max_y, res, res),
            width,
            height,
        })
    }

    /// Check a transform's origin against the lattice.
    pub fn verify(&self, transform: &GeoTransform) -> AlignmentCheck {
        let (x, y) = transform.origin();
        let offset_x = lattice_residual(x - self.spec.origin_x, self.spec.cell_size);
        let offset_y = lattice_residual(y - self.spec.origin_y, self.spec.cell_size);
        AlignmentCheck {
            offset_x,
            offset_y,
            tolerance: self.tolerance,
            aligned: offset_x <= self.tolerance && offset_y <= self.tolerance,
        }
    }
}

fn snap_floor(k: f64) -> f64 {
    let r = k.round();
    if (k - r).abs() < SNAP_EPSILON {
        r
    } else {
        k.floor()
    }
}

fn snap_ceil(k: f64) -> f64 {
    let r = k.round();
    if (k - r).abs() < SNAP_EPSILON {
        r
    } else {
        k.ceil()
    }
}

fn cell_count(extent: f64, res: f64) -> usize {
    let n = extent / res;
    let r = n.round();
    if (n - r).abs() < 1e-6 {
        r as usize
    } else {
        n.ceil() as usize
    }
}

/// Distance from `delta` to the nearest multiple of `cell`.
fn lattice_residual(delta: f64, cell: f64) -> f64 {
    let m = delta.rem_euclid(cell);
    m.min(cell - m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landfire(res: f64) -> GridAligner {
        GridAligner::new(GridAlignmentSpec::landfire_conus(res).unwrap())
    }

    #[test]
    fn test_align_expands_to_lattice() {
        let aligner = landfire(30.0);
        let bounds = BoundingBox::new(-772013.7, 1840117.2, -739888.1, 1871902.9);
        let aligned = aligner.align_bounds(&bounds).unwrap();

        assert!(aligned.bounds.contains(&bounds, 0.0));
        assert!(aligner.verify(&aligned.transform).aligned);
        assert!(aligned.bounds.width() - bounds.width() < 2.0 * 30.0);
        assert_eq!(aligned.width as f64 * 30.0, aligned.bounds.width());
    }

    #[test]
    fn test_on_lattice_bounds_unchanged() {
        let aligner = landfire(30.0);
        let (ox, oy) = LANDFIRE_ORIGIN;
        let bounds = BoundingBox::new(ox + 300.0, oy - 600.0, ox + 900.0, oy - 300.0);
        let aligned = aligner.align_bounds(&bounds).unwrap();
        assert_eq!(aligned.bounds, bounds);
        assert_eq!((aligned.width, aligned.height), (20, 10));
    }

    #[test]
    fn test_working_resolution_differs_from_cell() {
        let aligner = landfire(10.0);
        let (ox, oy) = LANDFIRE_ORIGIN;
        let bounds = BoundingBox::new(ox + 5.0, oy - 95.0, ox + 65.0, oy - 5.0);
        let aligned = aligner.align_bounds(&bounds).unwrap();
        assert_eq!(aligned.bounds, BoundingBox::new(ox, oy - 120.0, ox + 90.0, oy));
        assert_eq!((aligned.width, aligned.height), (9, 12));
        assert_eq!(aligned.transform.a, 10.0);
        assert_eq!(aligned.transform.e, -10.0);
    }

    #[test]
    fn test_verify_detects_offset() {
        let aligner = landfire(30.0);
        let (ox, oy) = LANDFIRE_ORIGIN;
        let shifted = GeoTransform::from_origin(ox + 12.0, oy, 30.0, 30.0);
        let check = aligner.verify(&shifted);
        assert!(!check.aligned);
        assert!((check.offset_x - 12.0).abs() < 1e-9);

        let near = GeoTransform::from_origin(ox + 29.99999999, oy - 60.0, 30.0, 30.0);
        assert!(aligner.verify(&near).aligned);
    }

    #[test]
    fn test_reference_lattice_needs_square_pixels() {
        let reference = |h: f64| {
            GridGeometry::new(
                10,
                10,
                GeoTransform::from_origin(1000.0, 5000.0, 30.0, h),
                Crs::Epsg(5070),
            )
            .unwrap()
        };
        let spec = GridAlignmentSpec::from_reference(&reference(30.0), None).unwrap();
        assert_eq!((spec.origin_x, spec.origin_y, spec.cell_size), (1000.0, 5000.0, 30.0));
        assert_eq!(spec.resolution, 30.0);

        let err = GridAlignmentSpec::from_reference(&reference(20.0), Some(10.0)).unwrap_err();
        assert!(err.to_string().contains("not square"));
    }

    #[test]
    fn test_invalid_spec_rejected() {
        assert!(GridAlignmentSpec::new(0.0, 0.0, 0.0, 30.0).is_err());
        assert!(GridAlignmentSpec::new(0.0, 0.0, 30.0, -1.0).is_err());
        assert!(GridAlignmentSpec::new(f64::NAN, 0.0, 30.0, 30.0).is_err());
    }
}
