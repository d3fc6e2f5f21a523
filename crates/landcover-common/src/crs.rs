//! Coordinate Reference System identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// EPSG code of WGS84 geographic coordinates.
pub const EPSG_WGS84: u32 = 4326;
/// EPSG code of NAD83 geographic coordinates.
pub const EPSG_NAD83: u32 = 4269;
/// EPSG code of Web Mercator.
pub const EPSG_WEB_MERCATOR: u32 = 3857;
/// EPSG code of NAD83 / Conus Albers, the fuel-model grid CRS.
pub const EPSG_CONUS_ALBERS: u32 = 5070;

/// A coordinate reference system identifier.
///
/// Rasters carry either an authority code or the full WKT text of a
/// definition with no (or an unknown) authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Crs {
    Epsg(u32),
    Wkt(String),
}

impl Crs {
    /// Parse a user supplied CRS string.
    ///
    /// Accepts formats like:
    /// - "EPSG:5070"
    /// - "epsg:4326"
    /// - "CRS:84" (equivalent to EPSG:4326)
    /// - WKT text beginning with `PROJCS`, `GEOGCS`, `PROJCRS` or `GEOGCRS`
    pub fn from_user_string(s: &str) -> Result<Self, CrsParseError> {
        let trimmed = s.trim();
        let upper = trimmed.to_uppercase();

        if upper == "CRS:84" {
            return Ok(Crs::Epsg(EPSG_WGS84));
        }

        if let Some(code) = upper.strip_prefix("EPSG:") {
            return code
                .trim()
                .parse()
                .map(Crs::Epsg)
                .map_err(|_| CrsParseError::InvalidCode(s.to_string()));
        }

        if ["PROJCS", "GEOGCS", "PROJCRS", "GEOGCRS"]
            .iter()
            .any(|prefix| upper.starts_with(prefix))
        {
            return Ok(Crs::Wkt(trimmed.to_string()));
        }

        Err(CrsParseError::UnsupportedCrs(s.to_string()))
    }

    /// EPSG code of this CRS, if it has one.
    ///
    /// For WKT definitions this is the outermost `AUTHORITY["EPSG", ...]`
    /// (WKT1) or `ID["EPSG", ...]` (WKT2) clause, which comes last in the text.
    pub fn epsg(&self) -> Option<u32> {
        match self {
            Crs::Epsg(code) => Some(*code),
            Crs::Wkt(wkt) => wkt_authority_code(wkt),
        }
    }

    /// Check if this is a geographic (lat/lon) CRS.
    pub fn is_geographic(&self) -> bool {
        match self {
            Crs::Epsg(code) => matches!(*code, EPSG_WGS84 | EPSG_NAD83 | 4258 | 4267),
            Crs::Wkt(wkt) => {
                let upper = wkt.trim_start().to_uppercase();
                upper.starts_with("GEOGCS") || upper.starts_with("GEOGCRS")
            }
        }
    }

    /// Human readable name: the first quoted string of a WKT definition.
    pub fn name(&self) -> String {
        match self {
            Crs::Epsg(code) => format!("EPSG:{}", code),
            Crs::Wkt(wkt) => wkt
                .split('"')
                .nth(1)
                .map(str::to_string)
                .unwrap_or_else(|| "unnamed WKT".to_string()),
        }
    }

    /// Whether two identifiers denote the same system.
    ///
    /// Authority codes are compared when both sides have one, otherwise the
    /// WKT text must match exactly.
    pub fn is_equivalent(&self, other: &Crs) -> bool {
        match (self.epsg(), other.epsg()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{}", code),
            Crs::Wkt(_) => write!(f, "WKT[{}]", self.name()),
        }
    }
}

fn wkt_authority_code(wkt: &str) -> Option<u32> {
    let upper = wkt.to_uppercase();
    let start = ["AUTHORITY[\"EPSG\",", "ID[\"EPSG\","]
        .iter()
        .filter_map(|needle| upper.rfind(needle).map(|i| i + needle.len()))
        .max()?;

    let digits: String = upper[start..]
        .chars()
        .skip_while(|c| c.is_whitespace() || *c == '"')
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[derive(Debug, thiserror::Error)]
pub enum CrsParseError {
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    #[error("Invalid EPSG code: {0}")]
    InvalidCode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crs_strings() {
        assert_eq!(Crs::from_user_string("EPSG:5070").unwrap(), Crs::Epsg(5070));
        assert_eq!(Crs::from_user_string("epsg:3857").unwrap(), Crs::Epsg(3857));
        assert_eq!(Crs::from_user_string("CRS:84").unwrap(), Crs::Epsg(4326));
        assert!(Crs::from_user_string("EPSG:abc").is_err());
        assert!(Crs::from_user_string("urn:foo").is_err());
    }

    #[test]
    fn test_wkt_outermost_authority() {
        let wkt = r#"PROJCS["NAD83 / Conus Albers",GEOGCS["NAD83",AUTHORITY["EPSG","4269"]],AUTHORITY["EPSG","5070"]]"#;
        let crs = Crs::from_user_string(wkt).unwrap();
        assert_eq!(crs.epsg(), Some(5070));
        assert_eq!(crs.name(), "NAD83 / Conus Albers");
        assert!(crs.is_equivalent(&Crs::Epsg(5070)));
        assert!(!crs.is_geographic());
    }

    #[test]
    fn test_wkt_without_authority() {
        let crs = Crs::Wkt(r#"PROJCS["custom albers"]"#.to_string());
        assert_eq!(crs.epsg(), None);
        assert!(!crs.is_equivalent(&Crs::Epsg(5070)));
    }
}
