//! Registry of PROJ.4 definitions keyed by EPSG code.

use std::collections::BTreeMap;

use landcover_common::crs::{EPSG_CONUS_ALBERS, EPSG_NAD83, EPSG_WEB_MERCATOR, EPSG_WGS84};
use landcover_common::Crs;
use serde::{Deserialize, Serialize};

/// NAD83 / Conus Albers as a PROJ.4 string.
pub const CONUS_ALBERS_PROJ: &str = "+proj=aea +lat_0=23 +lon_0=-96 +lat_1=29.5 +lat_2=45.5 \
     +x_0=0 +y_0=0 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs";

/// NAD83 / Conus Albers as WKT1, used to tag outputs when the definition
/// had to be supplied locally.
pub const CONUS_ALBERS_WKT: &str = concat!(
    r#"PROJCS["NAD83 / Conus Albers","#,
    r#"GEOGCS["NAD83",DATUM["North_American_Datum_1983","#,
    r#"SPHEROID["GRS 1980",6378137,298.257222101,AUTHORITY["EPSG","7019"]],"#,
    r#"TOWGS84[0,0,0,0,0,0,0],AUTHORITY["EPSG","6269"]],"#,
    r#"PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],"#,
    r#"UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],"#,
    r#"AUTHORITY["EPSG","4269"]],"#,
    r#"PROJECTION["Albers_Conic_Equal_Area"],"#,
    r#"PARAMETER["latitude_of_center",23],"#,
    r#"PARAMETER["longitude_of_center",-96],"#,
    r#"PARAMETER["standard_parallel_1",29.5],"#,
    r#"PARAMETER["standard_parallel_2",45.5],"#,
    r#"PARAMETER["false_easting",0],"#,
    r#"PARAMETER["false_northing",0],"#,
    r#"UNIT["metre",1,AUTHORITY["EPSG","9001"]],"#,
    r#"AXIS["Easting",EAST],AXIS["Northing",NORTH],"#,
    r#"AUTHORITY["EPSG","5070"]]"#
);

/// Where a resolved definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Looked up by EPSG code.
    Registry,
    /// Translated from the WKT carried by the raster.
    Wkt,
    /// The built-in Conus Albers definition, used when lookup failed.
    Fallback,
}

/// A CRS together with the definition used to transform it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCrs {
    /// Identifier to tag outputs with.
    pub crs: Crs,
    /// PROJ.4 definition handed to `proj4rs`.
    pub proj_string: String,
    pub geographic: bool,
    pub source: ResolutionSource,
}

/// Known EPSG definitions.
///
/// Built once and then only read; extra definitions from configuration are
/// added before the registry is shared.
#[derive(Debug, Clone, Default)]
pub struct CrsRegistry {
    definitions: BTreeMap<u32, String>,
}

impl CrsRegistry {
    /// A registry with no definitions at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Geographic WGS84/NAD83, Web Mercator, Conus Albers and the WGS84 UTM zones.
    pub fn builtin() -> Self {
        let mut definitions = BTreeMap::new();
        definitions.insert(EPSG_WGS84, "+proj=longlat +datum=WGS84 +no_defs".to_string());
        definitions.insert(
            EPSG_NAD83,
            "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs".to_string(),
        );
        definitions.insert(
            EPSG_WEB_MERCATOR,
            "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs"
                .to_string(),
        );
        definitions.insert(EPSG_CONUS_ALBERS, CONUS_ALBERS_PROJ.to_string());

        for zone in 1..=60u32 {
            definitions.insert(
                32600 + zone,
                format!("+proj=utm +zone={} +datum=WGS84 +units=m +no_defs", zone),
            );
            definitions.insert(
                32700 + zone,
                format!("+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs", zone),
            );
        }
        Self { definitions }
    }

    /// Add or replace a definition.
    pub fn with_definition(mut self, epsg: u32, proj_string: impl Into<String>) -> Self {
        self.definitions.insert(epsg, proj_string.into());
        self
    }

    pub fn get(&self, epsg: u32) -> Option<&str> {
        self.definitions.get(&epsg).map(String::as_str)
    }

    pub fn contains(&self, epsg: u32) -> bool {
        self.definitions.contains_key(&epsg)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Whether a CRS is the Conus Albers system the fallback definition covers.
pub fn is_conus_albers(crs: &Crs) -> bool {
    match crs {
        Crs::Epsg(code) => *code == EPSG_CONUS_ALBERS,
        Crs::Wkt(wkt) => {
            crs.epsg() == Some(EPSG_CONUS_ALBERS) || {
                let upper = wkt.to_uppercase();
                upper.contains("CONUS ALBERS") || upper.contains("CONUS_ALBERS")
            }
        }
    }
}

/// Whether a PROJ.4 definition describes geographic coordinates.
pub fn is_geographic_definition(proj_string: &str) -> bool {
    proj_string
        .split_whitespace()
        .any(|p| matches!(p, "+proj=longlat" | "+proj=latlong" | "+proj=lonlat" | "+proj=latlon"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_contents() {
        let registry = CrsRegistry::builtin();
        assert!(registry.contains(5070));
        assert!(registry.contains(4326));
        assert!(registry.get(32613).unwrap().contains("+zone=13"));
        assert!(registry.get(32733).unwrap().contains("+south"));
        assert!(!registry.contains(2193));
    }

    #[test]
    fn test_extra_definition_overrides() {
        let registry = CrsRegistry::empty().with_definition(2193, "+proj=tmerc +lat_0=0");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(2193), Some("+proj=tmerc +lat_0=0"));
    }

    #[test]
    fn test_conus_albers_recognition() {
        assert!(is_conus_albers(&Crs::Epsg(5070)));
        assert!(is_conus_albers(&Crs::Wkt(CONUS_ALBERS_WKT.to_string())));
        assert!(is_conus_albers(&Crs::Wkt(r#"PROJCS["NAD_1983_Conus_Albers"]"#.to_string())));
        assert!(!is_conus_albers(&Crs::Epsg(3857)));
    }

    #[test]
    fn test_geographic_definition() {
        assert!(is_geographic_definition("+proj=longlat +datum=WGS84 +no_defs"));
        assert!(!is_geographic_definition(CONUS_ALBERS_PROJ));
    }
}
