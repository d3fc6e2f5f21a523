//! The FBFM40 canonical classification (Scott & Burgan 2005).
//!
//! Numeric codes follow the LANDFIRE convention: non-burnable models in the
//! 90s, then grass (GR, 101-109), grass-shrub (GS, 121-124), shrub
//! (SH, 141-149), timber-understory (TU, 161-165), timber litter
//! (TL, 181-189) and slash-blowdown (SB, 201-204).

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

/// Description used for the output no-data value.
pub const NODATA_DESCRIPTION: &str = "NoData";

/// Burnable codes. A code set that only uses non-burnable models is not
/// enough to recognise an FBFM40 raster.
pub const BURNABLE_RANGE: RangeInclusive<i32> = 101..=204;

/// One fuel model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuelModel {
    pub code: i32,
    pub label: &'static str,
    pub description: &'static str,
}

impl FuelModel {
    pub fn is_burnable(&self) -> bool {
        BURNABLE_RANGE.contains(&self.code)
    }

    /// "GR2 - Low load, dry climate grass"
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.label, self.description)
    }
}

const fn fm(code: i32, label: &'static str, description: &'static str) -> FuelModel {
    FuelModel {
        code,
        label,
        description,
    }
}

/// All 45 models (40 burnable, 5 non-burnable).
pub const MODELS: &[FuelModel] = &[
    fm(91, "NB1", "Urban/Developed"),
    fm(92, "NB2", "Snow/Ice"),
    fm(93, "NB3", "Agricultural"),
    fm(98, "NB8", "Open Water"),
    fm(99, "NB9", "Barren"),
    fm(101, "GR1", "Short, sparse dry climate grass"),
    fm(102, "GR2", "Low load, dry climate grass"),
    fm(103, "GR3", "Low load, very coarse, humid climate grass"),
    fm(104, "GR4", "Moderate load, dry climate grass"),
    fm(105, "GR5", "Low load, humid climate grass"),
    fm(106, "GR6", "Moderate load, humid climate grass"),
    fm(107, "GR7", "High load, dry climate grass"),
    fm(108, "GR8", "High load, very coarse, humid climate grass"),
    fm(109, "GR9", "Very high load, humid climate grass"),
    fm(121, "GS1", "Low load, dry climate grass-shrub"),
    fm(122, "GS2", "Moderate load, dry climate grass-shrub"),
    fm(123, "GS3", "Moderate load, humid climate grass-shrub"),
    fm(124, "GS4", "High load, humid climate grass-shrub"),
    fm(141, "SH1", "Low load, dry climate shrub"),
    fm(142, "SH2", "Moderate load, dry climate shrub"),
    fm(143, "SH3", "Moderate load, humid climate shrub"),
    fm(144, "SH4", "Low load, humid climate timber-shrub"),
    fm(145, "SH5", "High load, dry climate shrub"),
    fm(146, "SH6", "Low load, humid climate shrub"),
    fm(147, "SH7", "Very high load, dry climate shrub"),
    fm(148, "SH8", "High load, humid climate shrub"),
    fm(149, "SH9", "Very high load, humid climate shrub"),
    fm(161, "TU1", "Low load, dry climate timber-grass-shrub"),
    fm(162, "TU2", "Moderate load, humid climate timber-shrub"),
    fm(163, "TU3", "Moderate load, humid climate timber-grass-shrub"),
    fm(164, "TU4", "Dwarf conifer with understory"),
    fm(165, "TU5", "Very high load, dry climate timber-shrub"),
    fm(181, "TL1", "Low load compact conifer litter"),
    fm(182, "TL2", "Low load broadleaf litter"),
    fm(183, "TL3", "Moderate load conifer litter"),
    fm(184, "TL4", "Small downed logs"),
    fm(185, "TL5", "High load conifer litter"),
    fm(186, "TL6", "Moderate load broadleaf litter"),
    fm(187, "TL7", "Large downed logs"),
    fm(188, "TL8", "Long-needle litter"),
    fm(189, "TL9", "Very high load broadleaf litter"),
    fm(201, "SB1", "Low load activity fuel"),
    fm(202, "SB2", "Moderate load activity fuel or low load blowdown"),
    fm(203, "SB3", "High load activity fuel or moderate load blowdown"),
    fm(204, "SB4", "High load blowdown"),
];

/// Look up a model by code.
pub fn model(code: i32) -> Option<&'static FuelModel> {
    MODELS.iter().find(|m| m.code == code)
}

/// Whether `code` is a valid FBFM40 class.
pub fn is_valid(code: i32) -> bool {
    model(code).is_some()
}

/// The set of valid FBFM40 codes.
pub fn valid_codes() -> BTreeSet<i32> {
    MODELS.iter().map(|m| m.code).collect()
}

/// Display names for every model plus the no-data value.
pub fn descriptions(nodata: i32) -> BTreeMap<i32, String> {
    let mut map: BTreeMap<i32, String> =
        MODELS.iter().map(|m| (m.code, m.display_name())).collect();
    map.insert(nodata, NODATA_DESCRIPTION.to_string());
    map
}
