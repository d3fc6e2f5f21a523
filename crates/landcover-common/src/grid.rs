//! Raster grid geometry: affine transform, dimensions and CRS.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bbox::BoundingBox;
use crate::crs::Crs;
use crate::error::{RasterError, RasterResult};

/// Affine transform from pixel (col, row) to world (x, y) coordinates.
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
///
/// `a` and `e` are the pixel sizes, `b` and `d` the rotation terms, and
/// `(c, f)` the world coordinate of the upper-left corner of pixel (0, 0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl GeoTransform {
    /// North-up transform with square or rectangular pixels.
    pub fn from_origin(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            a: pixel_width,
            b: 0.0,
            c: origin_x,
            d: 0.0,
            e: -pixel_height.abs(),
            f: origin_y,
        }
    }

    /// Build from GDAL ordering `[c, a, b, f, d, e]`.
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            a: gt[1],
            b: gt[2],
            c: gt[0],
            d: gt[4],
            e: gt[5],
            f: gt[3],
        }
    }

    /// GDAL ordering `[c, a, b, f, d, e]`.
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }

    /// Homogeneous matrix form.
    pub fn to_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.a, self.b, self.c, self.d, self.e, self.f, 0.0, 0.0, 1.0)
    }

    fn from_matrix(m: &Matrix3<f64>) -> Self {
        Self {
            a: m[(0, 0)],
            b: m[(0, 1)],
            c: m[(0, 2)],
            d: m[(1, 0)],
            e: m[(1, 1)],
            f: m[(1, 2)],
        }
    }

    /// Inverse transform, mapping world coordinates back to pixel space.
    pub fn inverse(&self) -> RasterResult<GeoTransform> {
        self.to_matrix()
            .try_inverse()
            .map(|m| Self::from_matrix(&m))
            .ok_or_else(|| RasterError::SingularTransform(self.to_string()))
    }

    /// World coordinate of a fractional pixel position.
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let p = self.to_matrix() * Vector3::new(col, row, 1.0);
        (p.x, p.y)
    }

    /// World coordinate of the centre of pixel (col, row).
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        self.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// True when there is no rotation, x grows east and y grows north.
    pub fn is_north_up(&self) -> bool {
        self.b == 0.0 && self.d == 0.0 && self.a > 0.0 && self.e < 0.0
    }

    /// Pixel width in world units.
    pub fn pixel_width(&self) -> f64 {
        self.a.abs()
    }

    /// Pixel height in world units (positive).
    pub fn pixel_height(&self) -> f64 {
        self.e.abs()
    }

    /// Upper-left corner in world coordinates.
    pub fn origin(&self) -> (f64, f64) {
        (self.c, self.f)
    }
}

impl fmt::Display for GeoTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}, {}, {})",
            self.a, self.b, self.c, self.d, self.e, self.f
        )
    }
}

/// Dimensions, transform and CRS of a raster.
///
/// These always change together: reprojection and alignment produce a new
/// `GridGeometry` rather than editing one field at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl GridGeometry {
    /// Create a geometry, checking it is non-empty and north-up.
    pub fn new(width: usize, height: usize, transform: GeoTransform, crs: Crs) -> RasterResult<Self> {
        if width == 0 || height == 0 {
            return Err(RasterError::InvalidDimensions { width, height });
        }
        if !transform.is_north_up() {
            return Err(RasterError::NotNorthUp(transform.to_string()));
        }
        Ok(Self {
            width,
            height,
            transform,
            crs,
        })
    }

    /// Total number of pixels.
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// World extent covered by the grid.
    pub fn bounds(&self) -> BoundingBox {
        let corners = [
            self.transform.pixel_to_world(0.0, 0.0),
            self.transform.pixel_to_world(self.width as f64, 0.0),
            self.transform.pixel_to_world(0.0, self.height as f64),
            self.transform.pixel_to_world(self.width as f64, self.height as f64),
        ];
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        BoundingBox::new(min_x, min_y, max_x, max_y)
    }
}

/// Storage type of raster samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl PixelType {
    /// Derive the pixel type from TIFF `BitsPerSample` and `SampleFormat`
    /// (1 = unsigned, 2 = signed, 3 = IEEE float).
    pub fn from_tiff(bits: u8, sample_format: u16) -> Option<Self> {
        match (sample_format, bits) {
            (1, 8) => Some(Self::U8),
            (2, 8) => Some(Self::I8),
            (1, 16) => Some(Self::U16),
            (2, 16) => Some(Self::I16),
            (1, 32) => Some(Self::U32),
            (2, 32) => Some(Self::I32),
            (3, 32) => Some(Self::F32),
            (3, 64) => Some(Self::F64),
            _ => None,
        }
    }

    /// Whether values are integral class codes.
    pub fn is_integer(&self) -> bool {
        !matches!(self, Self::F32 | Self::F64)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::I8 => "int8",
            Self::U16 => "uint16",
            Self::I16 => "int16",
            Self::U32 => "uint32",
            Self::I32 => "int32",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Full description of a single-band raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterGrid {
    pub geometry: GridGeometry,
    pub nodata: Option<f64>,
    pub pixel_type: PixelType,
}

impl RasterGrid {
    pub fn new(geometry: GridGeometry, nodata: Option<f64>, pixel_type: PixelType) -> Self {
        Self {
            geometry,
            nodata,
            pixel_type,
        }
    }

    pub fn width(&self) -> usize {
        self.geometry.width
    }

    pub fn height(&self) -> usize {
        self.geometry.height
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.geometry.transform
    }

    pub fn crs(&self) -> &Crs {
        &self.geometry.crs
    }

    /// Same raster description with a different geometry.
    pub fn with_geometry(&self, geometry: GridGeometry) -> Self {
        Self {
            geometry,
            nodata: self.nodata,
            pixel_type: self.pixel_type,
        }
    }

    /// Swap the whole geometry at once.
    pub fn replace_geometry(&mut self, geometry: GridGeometry) {
        self.geometry = geometry;
    }

    /// The no-data value as an integer class code, if it is one.
    pub fn nodata_code(&self) -> Option<i32> {
        self.nodata
            .filter(|v| v.fract() == 0.0 && *v >= i32::MIN as f64 && *v <= i32::MAX as f64)
            .map(|v| v as i32)
    }
}
