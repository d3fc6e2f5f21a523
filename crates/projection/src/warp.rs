//! Categorical reprojection.
//!
//! Every target pixel is mapped back into the source raster and takes either
//! the nearest source value or the majority of an n x n sub-pixel pattern.
//! Class codes are never blended, so there is no interpolating resampler.

use std::collections::BTreeMap;
use std::str::FromStr;

use landcover_common::{
    collect_blocks, BlockProducer, BlockWindow, BoundingBox, Crs, GeoTransform, GridGeometry,
    MajorityCounter, MemoryRaster, RasterError, RasterGrid, RasterResult, RasterSource,
    CODE_NODATA,
};
use proj4rs::proj::Proj;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::alignment::{GridAligner, GridAlignmentSpec};
use crate::error::{ProjectionError, Result};
use crate::registry::{
    is_conus_albers, is_geographic_definition, CrsRegistry, ResolutionSource, ResolvedCrs,
    CONUS_ALBERS_PROJ, CONUS_ALBERS_WKT,
};
use crate::transformer::CoordinateTransformer;
use crate::wkt::wkt_to_proj;

/// Resampling methods that keep class codes intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoricalResampling {
    /// Value of the source pixel under the target pixel centre.
    #[default]
    Nearest,
    /// Most frequent source value under the target pixel footprint.
    Mode,
}

impl FromStr for CategoricalResampling {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "nearest" | "near" => Ok(Self::Nearest),
            "mode" | "majority" => Ok(Self::Mode),
            _ => Err(ProjectionError::UnsupportedResampling(s.to_string())),
        }
    }
}

/// Settings for CRS resolution and warping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReprojectorConfig {
    /// Allow definitions that reference remote datum grids.
    pub network_lookup: bool,

    /// Resolve WKT through its embedded EPSG code when the registry knows it.
    pub prefer_embedded_epsg: bool,

    /// Use the built-in Conus Albers definition when lookup fails for it.
    pub allow_fallback: bool,

    /// Additional EPSG definitions as PROJ.4 strings.
    pub extra_definitions: BTreeMap<u32, String>,

    /// Extra points per edge when transforming extents.
    pub densify_points: usize,

    /// Upper bound on mode samples per axis.
    pub max_mode_samples: usize,
}

impl Default for ReprojectorConfig {
    fn default() -> Self {
        Self {
            network_lookup: false,
            prefer_embedded_epsg: true,
            allow_fallback: true,
            extra_definitions: BTreeMap::new(),
            densify_points: 21,
            max_mode_samples: 8,
        }
    }
}

/// Resolves CRSs and plans/executes categorical warps.
#[derive(Debug, Clone)]
pub struct Reprojector {
    config: ReprojectorConfig,
    registry: CrsRegistry,
}

impl Reprojector {
    /// Built-in registry plus the configured extra definitions.
    pub fn new(config: ReprojectorConfig) -> Self {
        let registry = CrsRegistry::builtin();
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: ReprojectorConfig, registry: CrsRegistry) -> Self {
        let registry = config
            .extra_definitions
            .iter()
            .fold(registry, |r, (code, def)| r.with_definition(*code, def.clone()));
        Self { config, registry }
    }

    pub fn config(&self) -> &ReprojectorConfig {
        &self.config
    }

    /// Resolve a CRS to a usable definition.
    ///
    /// A failed lookup for Conus Albers falls back to the built-in definition
    /// (when allowed); any other failure is returned.
    pub fn resolve(&self, crs: &Crs) -> Result<ResolvedCrs> {
        match self.lookup(crs) {
            Ok(resolved) => Ok(resolved),
            Err(err) if self.config.allow_fallback && is_conus_albers(crs) => {
                warn!(crs = %crs, error = %err, "CRS lookup failed, using built-in Conus Albers definition");
                Ok(conus_albers_fallback())
            }
            Err(err) => Err(err),
        }
    }

    fn lookup(&self, crs: &Crs) -> Result<ResolvedCrs> {
        let (identifier, definition, source) = match crs {
            Crs::Epsg(code) => {
                let def = self.registry.get(*code).ok_or_else(|| {
                    ProjectionError::crs_resolution(crs, "no definition in registry")
                })?;
                (crs.clone(), def.to_string(), ResolutionSource::Registry)
            }
            Crs::Wkt(wkt) => {
                let embedded = crs
                    .epsg()
                    .filter(|_| self.config.prefer_embedded_epsg)
                    .and_then(|code| self.registry.get(code).map(|def| (code, def)));
                match embedded {
                    Some((code, def)) => {
                        (Crs::Epsg(code), def.to_string(), ResolutionSource::Registry)
                    }
                    None => (crs.clone(), wkt_to_proj(wkt)?, ResolutionSource::Wkt),
                }
            }
        };

        let definition = if self.config.network_lookup {
            definition
        } else {
            strip_grid_references(&definition)
        };

        Proj::from_proj_string(&definition).map_err(|e| ProjectionError::InvalidDefinition {
            crs: crs.to_string(),
            reason: format!("{:?}", e),
        })?;

        debug!(crs = %crs, source = ?source, "Resolved CRS");
        Ok(ResolvedCrs {
            crs: identifier,
            geographic: is_geographic_definition(&definition),
            proj_string: definition,
            source,
        })
    }

    /// Transformer between two CRSs after resolving both.
    pub fn transformer(&self, from: &Crs, to: &Crs) -> Result<CoordinateTransformer> {
        CoordinateTransformer::new(&self.resolve(from)?, &self.resolve(to)?)
    }

    /// Extent of `source` expressed in `target_crs`.
    pub fn transform_bounds(&self, source: &GridGeometry, target_crs: &Crs) -> Result<BoundingBox> {
        self.transformer(&source.crs, target_crs)?
            .transform_bounds(&source.bounds(), self.config.densify_points)
    }

    /// Plan the output grid for warping `source` into `target_crs`.
    ///
    /// With an alignment spec the extent is snapped to its lattice at the
    /// spec's working resolution. Otherwise `resolution` is used, defaulting
    /// to one that keeps the diagonal pixel count of the source.
    pub fn target_geometry(
        &self,
        source: &GridGeometry,
        target_crs: &Crs,
        resolution: Option<f64>,
        alignment: Option<&GridAlignmentSpec>,
    ) -> Result<GridGeometry> {
        let target = self.resolve(target_crs)?;
        let transformer = CoordinateTransformer::new(&self.resolve(&source.crs)?, &target)?;
        let bounds = transformer.transform_bounds(&source.bounds(), self.config.densify_points)?;

        if let Some(spec) = alignment {
            let aligned = GridAligner::new(*spec).align_bounds(&bounds)?;
            debug!(
                width = aligned.width,
                height = aligned.height,
                origin_x = aligned.transform.c,
                origin_y = aligned.transform.f,
                "Aligned target grid"
            );
            return aligned.into_geometry(target.crs);
        }

        let res = match resolution {
            Some(r) if r > 0.0 && r.is_finite() => r,
            Some(r) => {
                return Err(ProjectionError::invalid_alignment(format!(
                    "resolution must be > 0, got {}",
                    r
                )))
            }
            None => {
                let diag_world = bounds.width().hypot(bounds.height());
                let diag_pixels = (source.width as f64).hypot(source.height as f64);
                diag_world / diag_pixels
            }
        };

        let width = ((bounds.width() / res).ceil() as usize).max(1);
        let height = ((bounds.height() / res).ceil() as usize).max(1);
        Ok(GridGeometry::new(
            width,
            height,
            GeoTransform::from_origin(bounds.min_x, bounds.max_y, res, res),
            target.crs,
        )?)
    }

    /// Warp a whole in-memory raster onto `target`.
    pub fn reproject(
        &self,
        source: &RasterGrid,
        data: &[i32],
        target: &GridGeometry,
        resampling: CategoricalResampling,
    ) -> Result<Vec<i32>> {
        let raster = MemoryRaster::new(source.clone(), data.to_vec())?;
        let mut stage = WarpStage::new(self, raster, target.clone(), resampling)?;
        Ok(collect_blocks(&mut stage, target.width, target.height, target.height)?)
    }
}

fn conus_albers_fallback() -> ResolvedCrs {
    ResolvedCrs {
        crs: Crs::Wkt(CONUS_ALBERS_WKT.to_string()),
        proj_string: CONUS_ALBERS_PROJ.to_string(),
        geographic: false,
        source: ResolutionSource::Fallback,
    }
}

/// Drop `+nadgrids`/`+geoidgrids` parameters that point at grid files.
fn strip_grid_references(definition: &str) -> String {
    definition
        .split_whitespace()
        .filter(|p| {
            let grid = p.starts_with("+nadgrids=") || p.starts_with("+geoidgrids=");
            !grid || p.ends_with("=@null")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Block producer that warps a [`RasterSource`] onto a target grid.
///
/// For each requested window it transforms the window's edges into the
/// source, reads only the source pixels they enclose (plus a margin), and
/// resamples from that buffer.
pub struct WarpStage<S> {
    source: S,
    to_source: CoordinateTransformer,
    source_inverse: GeoTransform,
    target: GridGeometry,
    resampling: CategoricalResampling,
    samples_per_axis: usize,
    source_nodata: Option<i32>,
    fill: i32,
}

impl<S: RasterSource> WarpStage<S> {
    pub fn new(
        reprojector: &Reprojector,
        source: S,
        target: GridGeometry,
        resampling: CategoricalResampling,
    ) -> Result<Self> {
        let source_grid = source.grid();
        let to_source = reprojector.transformer(&target.crs, source_grid.crs())?;
        let source_inverse = source_grid.transform().inverse()?;
        let source_nodata = source_grid.nodata_code();
        let fill = source_nodata.unwrap_or(CODE_NODATA as i32);

        let samples_per_axis = match resampling {
            CategoricalResampling::Nearest => 1,
            CategoricalResampling::Mode => footprint_samples(
                &to_source,
                &source_inverse,
                &target,
                reprojector.config.max_mode_samples.max(1),
            ),
        };
        debug!(resampling = ?resampling, samples_per_axis, "Prepared warp");

        Ok(Self {
            source,
            to_source,
            source_inverse,
            target,
            resampling,
            samples_per_axis,
            source_nodata,
            fill,
        })
    }

    /// Description of the warped output.
    pub fn output_grid(&self) -> RasterGrid {
        let source = self.source.grid();
        RasterGrid::new(self.target.clone(), Some(self.fill as f64), source.pixel_type)
    }

    /// Fractional source pixel position of a target world coordinate.
    fn source_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let (sx, sy) = self.to_source.transform(x, y).ok()?;
        Some(self.source_inverse.pixel_to_world(sx, sy))
    }

    /// Source window enclosing everything `window` can sample.
    fn source_window(&self, window: &BlockWindow) -> Option<BlockWindow> {
        let t = &self.target.transform;
        let steps = 16usize;
        let mut points = Vec::with_capacity(4 * (steps + 1));
        for i in 0..=steps {
            let f = i as f64 / steps as f64;
            let col = window.col_off as f64 + f * window.cols as f64;
            let row = window.row_off as f64 + f * window.rows as f64;
            points.push((col, window.row_off as f64));
            points.push((col, window.row_end() as f64));
            points.push((window.col_off as f64, row));
            points.push((window.col_end() as f64, row));
        }

        let pixels = points.into_iter().filter_map(|(col, row)| {
            let (x, y) = t.pixel_to_world(col, row);
            self.source_pixel(x, y)
        });
        let extent = BoundingBox::from_points(pixels)?;

        let grid = self.source.grid();
        let margin = 2.0 + self.samples_per_axis as f64;
        let col0 = (extent.min_x - margin).floor().max(0.0);
        let row0 = (extent.min_y - margin).floor().max(0.0);
        let col1 = (extent.max_x + margin).ceil().min(grid.width() as f64);
        let row1 = (extent.max_y + margin).ceil().min(grid.height() as f64);
        if col1 <= col0 || row1 <= row0 {
            return None;
        }
        Some(BlockWindow::new(
            row0 as usize,
            col0 as usize,
            (row1 - row0) as usize,
            (col1 - col0) as usize,
        ))
    }
}

impl<S: RasterSource> BlockProducer<i32> for WarpStage<S> {
    fn produce(&mut self, window: &BlockWindow) -> RasterResult<Vec<i32>> {
        window.check_within(self.target.width, self.target.height)?;
        let mut out = vec![self.fill; window.pixel_count()];

        let Some(src_window) = self.source_window(window) else {
            return Ok(out);
        };
        let src = self.source.read_window(&src_window)?;

        let lookup = |col: f64, row: f64| -> Option<i32> {
            if col < 0.0 || row < 0.0 {
                return None;
            }
            let (c, r) = (col.floor() as usize, row.floor() as usize);
            if c < src_window.col_off
                || r < src_window.row_off
                || c >= src_window.col_end()
                || r >= src_window.row_end()
            {
                return None;
            }
            let v = src[(r - src_window.row_off) * src_window.cols + (c - src_window.col_off)];
            (Some(v) != self.source_nodata).then_some(v)
        };

        let t = self.target.transform;
        let n = self.samples_per_axis;
        let mut counter = MajorityCounter::with_capacity(n * n);

        for row in 0..window.rows {
            for col in 0..window.cols {
                let tc = (window.col_off + col) as f64;
                let tr = (window.row_off + row) as f64;

                let value = match self.resampling {
                    CategoricalResampling::Nearest => {
                        let (x, y) = t.pixel_to_world(tc + 0.5, tr + 0.5);
                        self.source_pixel(x, y).and_then(|(sc, sr)| lookup(sc, sr))
                    }
                    CategoricalResampling::Mode => {
                        counter.clear();
                        for i in 0..n {
                            for j in 0..n {
                                let fx = (j as f64 + 0.5) / n as f64;
                                let fy = (i as f64 + 0.5) / n as f64;
                                let (x, y) = t.pixel_to_world(tc + fx, tr + fy);
                                if let Some(v) =
                                    self.source_pixel(x, y).and_then(|(sc, sr)| lookup(sc, sr))
                                {
                                    counter.push(v);
                                }
                            }
                        }
                        counter.winner()
                    }
                };

                if let Some(v) = value {
                    out[row * window.cols + col] = v;
                }
            }
        }
        Ok(out)
    }
}

/// Samples per axis needed to cover one target pixel's source footprint.
fn footprint_samples(
    to_source: &CoordinateTransformer,
    source_inverse: &GeoTransform,
    target: &GridGeometry,
    cap: usize,
) -> usize {
    let t = &target.transform;
    let (cc, cr) = (target.width as f64 / 2.0, target.height as f64 / 2.0);
    let corner = |dc: f64, dr: f64| -> Option<(f64, f64)> {
        let (x, y) = t.pixel_to_world(cc + dc, cr + dr);
        let (sx, sy) = to_source.transform(x, y).ok()?;
        Some(source_inverse.pixel_to_world(sx, sy))
    };

    match (corner(0.0, 0.0), corner(1.0, 0.0), corner(0.0, 1.0)) {
        (Some(o), Some(right), Some(down)) => {
            let span_x = (right.0 - o.0).hypot(right.1 - o.1);
            let span_y = (down.0 - o.0).hypot(down.1 - o.1);
            let span = span_x.max(span_y);
            if span.is_finite() {
                (span.ceil() as usize).clamp(1, cap)
            } else {
                1
            }
        }
        _ => 1,
    }
}

impl From<ProjectionError> for RasterError {
    fn from(err: ProjectionError) -> Self {
        match err {
            ProjectionError::Raster(inner) => inner,
            other => RasterError::read_failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landcover_common::PixelType;

    fn grid(width: usize, height: usize, origin: (f64, f64), res: f64, crs: Crs) -> RasterGrid {
        let geometry =
            GridGeometry::new(width, height, GeoTransform::from_origin(origin.0, origin.1, res, res), crs)
                .unwrap();
        RasterGrid::new(geometry, Some(-9999.0), PixelType::I16)
    }

    #[test]
    fn test_resampling_rejects_averaging() {
        assert_eq!("Mode".parse::<CategoricalResampling>().unwrap(), CategoricalResampling::Mode);
        assert!(matches!(
            "bilinear".parse::<CategoricalResampling>(),
            Err(ProjectionError::UnsupportedResampling(_))
        ));
    }

    #[test]
    fn test_fallback_when_registry_lacks_albers() {
        let reprojector = Reprojector::with_registry(ReprojectorConfig::default(), CrsRegistry::empty());
        let resolved = reprojector.resolve(&Crs::Epsg(5070)).unwrap();
        assert_eq!(resolved.source, ResolutionSource::Fallback);
        assert_eq!(resolved.crs.epsg(), Some(5070));
    }

    #[test]
    fn test_no_fallback_for_other_crs() {
        let reprojector = Reprojector::with_registry(ReprojectorConfig::default(), CrsRegistry::empty());
        assert!(matches!(
            reprojector.resolve(&Crs::Epsg(3857)),
            Err(ProjectionError::CrsResolution { .. })
        ));

        let strict = ReprojectorConfig {
            allow_fallback: false,
            ..Default::default()
        };
        let reprojector = Reprojector::with_registry(strict, CrsRegistry::empty());
        assert!(reprojector.resolve(&Crs::Epsg(5070)).is_err());
    }

    #[test]
    fn test_wkt_resolves_through_embedded_code() {
        let reprojector = Reprojector::new(ReprojectorConfig::default());
        let resolved = reprojector.resolve(&Crs::Wkt(CONUS_ALBERS_WKT.to_string())).unwrap();
        assert_eq!(resolved.crs, Crs::Epsg(5070));
        assert_eq!(resolved.source, ResolutionSource::Registry);

        let config = ReprojectorConfig {
            prefer_embedded_epsg: false,
            ..Default::default()
        };
        let resolved = Reprojector::new(config)
            .resolve(&Crs::Wkt(CONUS_ALBERS_WKT.to_string()))
            .unwrap();
        assert_eq!(resolved.source, ResolutionSource::Wkt);
    }

    #[test]
    fn test_grid_references_stripped_offline() {
        let stripped = strip_grid_references("+proj=longlat +nadgrids=conus +geoidgrids=@null +no_defs");
        assert_eq!(stripped, "+proj=longlat +geoidgrids=@null +no_defs");
    }

    #[test]
    fn test_same_crs_nearest_is_identity() {
        let source = grid(4, 3, (0.0, 30.0), 10.0, Crs::Epsg(5070));
        let data: Vec<i32> = (1..=12).collect();
        let reprojector = Reprojector::new(ReprojectorConfig::default());
        let out = reprojector
            .reproject(&source, &data, &source.geometry, CategoricalResampling::Nearest)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_mode_downsample_takes_majority() {
        // 4x4 at 10 m into 2x2 at 20 m; each output pixel covers one 2x2 quad.
        let source = grid(4, 4, (0.0, 40.0), 10.0, Crs::Epsg(5070));
        #[rustfmt::skip]
        let data = vec![
            1, 1, 2, 3,
            1, 5, 2, 2,
            7, 7, 8, -9999,
            7, 9, -9999, -9999,
        ];
        let target = GridGeometry::new(2, 2, GeoTransform::from_origin(0.0, 40.0, 20.0, 20.0), Crs::Epsg(5070)).unwrap();
        let reprojector = Reprojector::new(ReprojectorConfig::default());
        let out = reprojector
            .reproject(&source, &data, &target, CategoricalResampling::Mode)
            .unwrap();
        assert_eq!(out, vec![1, 2, 7, 8]);
    }

    #[test]
    fn test_outside_source_is_nodata() {
        let source = grid(2, 2, (0.0, 20.0), 10.0, Crs::Epsg(5070));
        let target = GridGeometry::new(4, 2, GeoTransform::from_origin(0.0, 20.0, 10.0, 10.0), Crs::Epsg(5070)).unwrap();
        let reprojector = Reprojector::new(ReprojectorConfig::default());
        let out = reprojector
            .reproject(&source, &[1, 2, 3, 4], &target, CategoricalResampling::Nearest)
            .unwrap();
        assert_eq!(out, vec![1, 2, -9999, -9999, 3, 4, -9999, -9999]);
    }
}
