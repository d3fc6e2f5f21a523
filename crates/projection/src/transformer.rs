//! Point and extent transforms between two resolved CRSs.

use std::fmt;

use landcover_common::BoundingBox;
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::error::{ProjectionError, Result};
use crate::registry::ResolvedCrs;

/// Reusable transformer between two coordinate systems.
///
/// Geographic coordinates go in and come out in degrees; the radian
/// conversion `proj4rs` needs happens inside [`CoordinateTransformer::transform`].
pub struct CoordinateTransformer {
    projections: Option<(Proj, Proj)>,
    source_geographic: bool,
    target_geographic: bool,
    label: String,
}

impl fmt::Debug for CoordinateTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinateTransformer")
            .field("label", &self.label)
            .field("identity", &self.projections.is_none())
            .finish_non_exhaustive()
    }
}

impl CoordinateTransformer {
    /// Build a transformer from `source` to `target`.
    ///
    /// Equivalent systems yield an identity transformer that never calls into `proj4rs`.
    pub fn new(source: &ResolvedCrs, target: &ResolvedCrs) -> Result<Self> {
        let label = format!("{} -> {}", source.crs, target.crs);
        let identity =
            source.proj_string == target.proj_string || source.crs.is_equivalent(&target.crs);

        let projections = if identity {
            None
        } else {
            Some((build_proj(source)?, build_proj(target)?))
        };

        Ok(Self {
            projections,
            source_geographic: source.geographic,
            target_geographic: target.geographic,
            label,
        })
    }

    /// True when no transform is applied.
    pub fn is_identity(&self) -> bool {
        self.projections.is_none()
    }

    /// Transform one coordinate pair.
    #[inline]
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let Some((src, dst)) = &self.projections else {
            return Ok((x, y));
        };

        let (in_x, in_y) = if self.source_geographic {
            (x.to_radians(), y.to_radians())
        } else {
            (x, y)
        };

        let mut point = (in_x, in_y, 0.0);
        transform(src, dst, &mut point)
            .map_err(|e| ProjectionError::Transform(format!("{}: {:?}", self.label, e)))?;

        let out = if self.target_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if out.0.is_finite() && out.1.is_finite() {
            Ok(out)
        } else {
            Err(ProjectionError::Transform(format!(
                "{}: non-finite result for ({}, {})",
                self.label, x, y
            )))
        }
    }

    /// Transform an extent by densifying each edge with `densify` extra
    /// points, so curved edges in the target system are enclosed.
    ///
    /// Points that fail to transform are skipped; the call only fails if
    /// none succeed.
    pub fn transform_bounds(&self, bounds: &BoundingBox, densify: usize) -> Result<BoundingBox> {
        if self.is_identity() {
            return Ok(*bounds);
        }

        let steps = densify + 1;
        let mut points = Vec::with_capacity(4 * steps);
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let x = bounds.min_x + t * bounds.width();
            let y = bounds.min_y + t * bounds.height();
            points.push((x, bounds.min_y));
            points.push((x, bounds.max_y));
            points.push((bounds.min_x, y));
            points.push((bounds.max_x, y));
        }

        let transformed = points
            .into_iter()
            .filter_map(|(x, y)| self.transform(x, y).ok());

        BoundingBox::from_points(transformed).ok_or_else(|| {
            ProjectionError::Transform(format!("{}: no edge point of {:?} transformed", self.label, bounds))
        })
    }
}

fn build_proj(resolved: &ResolvedCrs) -> Result<Proj> {
    Proj::from_proj_string(&resolved.proj_string).map_err(|e| ProjectionError::InvalidDefinition {
        crs: resolved.crs.to_string(),
        reason: format!("{:?}", e),
    })
}
