//! Common test fixtures for land-cover reconciliation tests.
//!
//! This module provides pre-defined class codes, reference lattices and
//! small hand-checked scenarios.

/// ESRI 10 m land-cover codes.
pub mod esri {
    pub const WATER: i32 = 1;
    pub const TREES: i32 = 2;
    pub const FLOODED_VEGETATION: i32 = 4;
    pub const CROPS: i32 = 5;
    pub const BUILT: i32 = 7;
    pub const BARE: i32 = 8;
    pub const SNOW_ICE: i32 = 9;
    pub const CLOUDS: i32 = 10;
    pub const RANGELAND: i32 = 11;

    /// Every code the scheme defines.
    pub const ALL_CODES: [i32; 9] = [1, 2, 4, 5, 7, 8, 9, 10, 11];
}

/// FBFM40 fuel-model codes used by the default mapping.
pub mod fbfm40 {
    pub const URBAN: i16 = 91;
    pub const SNOW_ICE: i16 = 92;
    pub const WATER: i16 = 98;
    pub const GR2: i16 = 102;
    pub const GS1: i16 = 121;
    pub const TL3: i16 = 183;

    pub const NODATA: i16 = -9999;
}

/// Reference lattices.
pub mod lattice {
    /// LANDFIRE CONUS grid origin in EPSG:5070.
    pub const LANDFIRE_ORIGIN: (f64, f64) = (-2362425.0, 3310005.0);

    /// LANDFIRE cell size in meters.
    pub const LANDFIRE_CELL: f64 = 30.0;

    /// An extent in EPSG:5070 that is deliberately off-lattice (Colorado Front Range).
    pub const FRONT_RANGE_BOUNDS: (f64, f64, f64, f64) =
        (-772_013.7, 1_840_117.2, -739_888.1, 1_871_902.9);
}

/// Hand-checked end-to-end scenarios.
pub mod scenario {
    /// 3x3 source raster: water, trees, built with a hole in the centre.
    pub const SOURCE_3X3: [i32; 9] = [1, 1, 2, 2, -9999, 2, 7, 7, 7];

    /// Expected codes after remapping with the default ESRI table.
    pub const REMAPPED_3X3: [i16; 9] = [98, 98, 183, 183, -9999, 183, 91, 91, 91];

    /// Expected codes after a 3x3 gap fill of [`REMAPPED_3X3`].
    pub const FILLED_3X3: [i16; 9] = [98, 98, 183, 183, 183, 183, 91, 91, 91];
}

/// Common CRS strings.
pub mod crs {
    pub const CONUS_ALBERS: &str = "EPSG:5070";
    pub const WGS84: &str = "EPSG:4326";
    pub const WEB_MERCATOR: &str = "EPSG:3857";
}
