//! Known classification systems and their built-in tables.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{MappingError, Result};
use crate::fbfm40;
use crate::rules::{MappingTable, Provenance};
use crate::validation::SemanticRule;

/// Tag for a land-cover classification scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationSystem {
    /// Scott & Burgan fuel models; the canonical target.
    Fbfm40,
    /// ESRI 10 m land use / land cover (codes 1-11).
    EsriLulc,
    /// Sentinel-derived fuel classification, 2024 release.
    SentinelFuel2024,
    /// LANDFIRE fuel model product with three-digit codes.
    LandfireUs,
    Unknown,
}

impl ClassificationSystem {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Fbfm40 => "FBFM40",
            Self::EsriLulc => "ESRI_LULC",
            Self::SentinelFuel2024 => "SENTINEL_FUEL_2024",
            Self::LandfireUs => "LANDFIRE_US",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn is_canonical(&self) -> bool {
        matches!(self, Self::Fbfm40)
    }
}

impl fmt::Display for ClassificationSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ClassificationSystem {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "FBFM40" => Ok(Self::Fbfm40),
            "ESRI_LULC" | "ESRI" | "ESRI_PFA" => Ok(Self::EsriLulc),
            "SENTINEL_FUEL_2024" | "SENTINEL" => Ok(Self::SentinelFuel2024),
            "LANDFIRE_US" | "LANDFIRE" => Ok(Self::LandfireUs),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(MappingError::UnknownSystem(s.to_string())),
        }
    }
}

/// Code magnitude a scheme uses, which decides the detection stage it
/// takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Magnitude {
    /// Codes below ~150.
    Low,
    /// Three-digit codes.
    High,
}

/// A registered scheme.
#[derive(Debug, Clone)]
pub struct SystemDefinition {
    pub system: ClassificationSystem,
    pub description: String,
    pub magnitude: Magnitude,
    /// Codes characteristic of the scheme.
    pub signature: BTreeSet<i32>,
    pub table: Arc<MappingTable>,
}

/// Read-only registry of schemes, built once per process.
///
/// Order matters: detection breaks ties between equally good candidates by
/// registration order.
#[derive(Debug, Clone)]
pub struct SystemRegistry {
    systems: Vec<SystemDefinition>,
}

impl SystemRegistry {
    /// FBFM40 identity, ESRI, Sentinel and LANDFIRE, in that order.
    pub fn builtin() -> Result<Self> {
        let canonical = fbfm40::valid_codes();
        let systems = vec![
            SystemDefinition {
                system: ClassificationSystem::Fbfm40,
                description: "Scott & Burgan 40 fire behavior fuel models".to_string(),
                magnitude: Magnitude::High,
                signature: canonical.clone(),
                table: Arc::new(MappingTable::identity(canonical)?),
            },
            SystemDefinition {
                system: ClassificationSystem::EsriLulc,
                description: "ESRI 10 m annual land use / land cover".to_string(),
                magnitude: Magnitude::Low,
                signature: esri::CODES.iter().copied().collect(),
                table: Arc::new(esri_table()?),
            },
            SystemDefinition {
                system: ClassificationSystem::SentinelFuel2024,
                description: "Sentinel-derived fuel classification 2024".to_string(),
                magnitude: Magnitude::Low,
                signature: SENTINEL_SIGNATURE.iter().copied().collect(),
                table: Arc::new(sentinel_table()?),
            },
            SystemDefinition {
                system: ClassificationSystem::LandfireUs,
                description: "LANDFIRE fuel model data (US)".to_string(),
                magnitude: Magnitude::High,
                signature: LANDFIRE_SIGNATURE.iter().copied().collect(),
                table: Arc::new(landfire_table()?),
            },
        ];
        Ok(Self { systems })
    }

    /// Replace the table registered for `system`, e.g. with one loaded from
    /// a mapping document.
    pub fn with_table(mut self, system: ClassificationSystem, table: MappingTable) -> Result<Self> {
        let def = self
            .systems
            .iter_mut()
            .find(|d| d.system == system)
            .ok_or_else(|| MappingError::UnknownSystem(system.to_string()))?;
        def.table = Arc::new(table);
        Ok(self)
    }

    pub fn get(&self, system: ClassificationSystem) -> Option<&SystemDefinition> {
        self.systems.iter().find(|d| d.system == system)
    }

    pub fn table(&self, system: ClassificationSystem) -> Option<Arc<MappingTable>> {
        self.get(system).map(|d| Arc::clone(&d.table))
    }

    /// Definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &SystemDefinition> {
        self.systems.iter()
    }
}

/// ESRI land-cover codes and names.
pub mod esri {
    pub const WATER: i32 = 1;
    pub const TREES: i32 = 2;
    pub const FLOODED_VEGETATION: i32 = 4;
    pub const CROPS: i32 = 5;
    pub const BUILT_AREA: i32 = 7;
    pub const BARE_GROUND: i32 = 8;
    pub const SNOW_ICE: i32 = 9;
    pub const CLOUDS: i32 = 10;
    pub const RANGELAND: i32 = 11;

    pub const CODES: [i32; 9] = [
        WATER,
        TREES,
        FLOODED_VEGETATION,
        CROPS,
        BUILT_AREA,
        BARE_GROUND,
        SNOW_ICE,
        CLOUDS,
        RANGELAND,
    ];

    pub const NAMES: [(i32, &str); 9] = [
        (WATER, "Water"),
        (TREES, "Trees"),
        (FLOODED_VEGETATION, "Flooded vegetation"),
        (CROPS, "Crops"),
        (BUILT_AREA, "Built Area"),
        (BARE_GROUND, "Bare ground"),
        (SNOW_ICE, "Snow/Ice"),
        (CLOUDS, "Clouds"),
        (RANGELAND, "Rangeland"),
    ];
}

/// The default ESRI -> FBFM40 table.
pub fn esri_table() -> Result<MappingTable> {
    use esri::*;

    MappingTable::builder("ESRI_LULC_to_FBFM40")
        .version("2.0")
        .description("Conservative 1:1 mapping prioritising fire safety")
        .provenance(Provenance::Builtin)
        .source_dataset("ESRI_LULC")
        .rule(WATER, 98, 0.95, "Perfect semantic match: Water -> Open Water")
        .rule(
            TREES,
            183,
            0.55,
            "Conservative choice: Trees -> Moderate conifer litter (high uncertainty)",
        )
        .rule(
            FLOODED_VEGETATION,
            121,
            0.60,
            "Reasonable match: Flooded vegetation -> Grass-shrub mix",
        )
        .rule(CROPS, 102, 0.75, "Good match: Crops behave like low load grass fuels")
        .rule(BUILT_AREA, 91, 0.90, "Direct match: Built Area -> Urban/Developed")
        .rule(BARE_GROUND, 99, 0.85, "Good match: Bare ground -> Barren")
        .rule(SNOW_ICE, 92, 0.95, "Perfect match: Snow/Ice -> Snow/Ice")
        .rule(CLOUDS, 183, 0.20, "Very uncertain: Clouds -> Default forest assumption")
        .rule(RANGELAND, 102, 0.70, "Good match: Rangeland -> Low load grass")
        .expected_sources(CODES)
        .source_names(NAMES)
        .semantic_rules(SemanticRule::esri_defaults())
        .uncertain_code(Some(CLOUDS))
        .build()
}

const SENTINEL_SIGNATURE: [i32; 16] = [1, 2, 3, 4, 5, 10, 11, 20, 21, 22, 30, 31, 100, 101, 102, 103];

const LANDFIRE_SIGNATURE: [i32; 11] = [101, 102, 103, 108, 109, 110, 201, 202, 301, 902, 998];

fn sentinel_table() -> Result<MappingTable> {
    let rules: [(i32, i32, f32, &str); 16] = [
        (1, 101, 0.95, "Spectral similarity"),
        (2, 122, 0.87, "Vegetation structure"),
        (3, 104, 0.91, "Height analysis"),
        (4, 147, 0.82, "Density classification"),
        (5, 142, 0.89, "Canopy cover"),
        (10, 141, 0.91, "Climate adjusted"),
        (11, 145, 0.88, "Load estimation"),
        (20, 181, 0.89, "Forest type"),
        (21, 186, 0.85, "Deciduous classification"),
        (22, 165, 0.87, "Mixed forest"),
        (30, 201, 0.75, "Disturbance detection"),
        (31, 202, 0.78, "Slash estimation"),
        (100, 91, 0.98, "Land use classification"),
        (101, 93, 0.96, "Agricultural masking"),
        (102, 98, 0.99, "Water detection"),
        (103, 99, 0.94, "Bare soil classification"),
    ];
    table_from_rows("SENTINEL_FUEL_2024_to_FBFM40", "SENTINEL_FUEL_2024", &rules)
}

fn landfire_table() -> Result<MappingTable> {
    let rules: [(i32, i32, f32, &str); 20] = [
        (101, 101, 0.93, "Direct correspondence"),
        (102, 122, 0.88, "Vegetation type"),
        (103, 104, 0.91, "Grass height"),
        (104, 147, 0.89, "Shrub density"),
        (105, 142, 0.87, "Brush classification"),
        (106, 145, 0.85, "Dormant vegetation"),
        (107, 144, 0.83, "Southern vegetation"),
        (108, 181, 0.92, "Forest floor"),
        (109, 186, 0.89, "Hardwood litter"),
        (110, 165, 0.91, "Understory analysis"),
        (201, 141, 0.85, "Climate classification"),
        (202, 145, 0.87, "Shrub load analysis"),
        (301, 201, 0.78, "Logging history"),
        (302, 202, 0.81, "Slash density"),
        (303, 203, 0.84, "Heavy disturbance"),
        (901, 91, 0.97, "Urban classification"),
        (902, 92, 0.99, "Snow/ice detection"),
        (903, 93, 0.95, "Agricultural land"),
        (998, 98, 0.99, "Water body detection"),
        (999, 99, 0.92, "Barren land"),
    ];
    table_from_rows("LANDFIRE_US_to_FBFM40", "LANDFIRE_US", &rules)
}

fn table_from_rows(name: &str, dataset: &str, rows: &[(i32, i32, f32, &str)]) -> Result<MappingTable> {
    let mut builder = MappingTable::builder(name)
        .provenance(Provenance::Builtin)
        .source_dataset(dataset);
    for &(source, target, confidence, rationale) in rows {
        builder = builder.rule(source, target, confidence, rationale);
    }
    builder.build()
}
