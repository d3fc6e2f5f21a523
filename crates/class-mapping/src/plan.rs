//! Mapping plans: how well a scheme's table covers what a raster contains.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::rules::{MappedClass, MappingTable};
use crate::systems::{ClassificationSystem, SystemRegistry};

/// Share of observed codes a table must map.
pub const MIN_COVERAGE: f64 = 0.7;

/// Share of observed codes that must map at or above the caller's threshold.
pub const MIN_HIGH_CONFIDENCE_RATIO: f64 = 0.5;

/// Default per-code confidence threshold.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.8;

/// A suggested target for a code no table covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub target_code: i32,
    pub reason: String,
    pub confidence: f32,
}

impl Recommendation {
    fn new(target_code: i32, reason: &str, confidence: f32) -> Self {
        Self {
            target_code,
            reason: reason.to_string(),
            confidence,
        }
    }
}

/// Rule-of-thumb FBFM40 targets for an unmapped code, best first.
///
/// Bands: <= 10 grass, <= 20 shrub, <= 40 heavy timber/slash, >= 90
/// non-burnable. Codes 41-89 get nothing.
pub fn recommend_targets(code: i32) -> Vec<Recommendation> {
    let mut suggestions = if code <= 10 {
        vec![
            Recommendation::new(101, "Low value suggests grass fuel", 0.6),
            Recommendation::new(122, "Could be grass-shrub mix", 0.5),
            Recommendation::new(141, "Possible low shrub", 0.4),
        ]
    } else if code <= 20 {
        vec![
            Recommendation::new(147, "Medium value suggests heavy shrub", 0.6),
            Recommendation::new(145, "Could be brush", 0.5),
            Recommendation::new(181, "Possible timber litter", 0.4),
        ]
    } else if code <= 40 {
        vec![
            Recommendation::new(165, "Higher value suggests heavy timber", 0.6),
            Recommendation::new(202, "Could be medium slash", 0.5),
            Recommendation::new(203, "Possible heavy slash", 0.4),
        ]
    } else if code >= 90 {
        vec![
            Recommendation::new(91, "High value suggests urban/developed", 0.7),
            Recommendation::new(98, "Could be water", 0.6),
            Recommendation::new(99, "Possible barren land", 0.5),
        ]
    } else {
        Vec::new()
    };
    suggestions.truncate(3);
    suggestions
}

/// How a detected scheme's table applies to a raster's observed codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingPlan {
    pub system: ClassificationSystem,
    /// False when the raster is already canonical.
    pub mapping_required: bool,
    pub auto_mappable: bool,
    pub mappings: BTreeMap<i32, MappedClass>,
    pub unmapped: Vec<i32>,
    pub coverage: f64,
    pub high_confidence_ratio: f64,
    pub threshold: f32,
    pub validation_passed: bool,
    pub recommendations: BTreeMap<i32, Vec<Recommendation>>,
}

impl MappingPlan {
    pub fn auto_mapped_count(&self) -> usize {
        self.mappings.len()
    }

    pub fn manual_review_count(&self) -> usize {
        self.unmapped.len()
    }

    /// Whether a run may proceed, given an explicit override.
    pub fn may_proceed(&self, force: bool) -> bool {
        self.auto_mappable || force
    }

    /// Human-readable reasons the plan is not auto-mappable.
    pub fn blockers(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.auto_mappable {
            return reasons;
        }
        if self.system == ClassificationSystem::Unknown {
            reasons.push("classification system is unknown".to_string());
        }
        if self.coverage < MIN_COVERAGE {
            reasons.push(format!(
                "table covers {:.0}% of observed codes (need {:.0}%)",
                self.coverage * 100.0,
                MIN_COVERAGE * 100.0
            ));
        }
        if self.high_confidence_ratio < MIN_HIGH_CONFIDENCE_RATIO {
            reasons.push(format!(
                "{:.0}% of observed codes map with confidence >= {:.2} (need {:.0}%)",
                self.high_confidence_ratio * 100.0,
                self.threshold,
                MIN_HIGH_CONFIDENCE_RATIO * 100.0
            ));
        }
        if !self.validation_passed {
            reasons.push("mapping table failed validation".to_string());
        }
        reasons
    }

    fn identity(observed: &BTreeSet<i32>, threshold: f32) -> Self {
        let mappings = observed
            .iter()
            .filter_map(|&c| {
                i16::try_from(c).ok().map(|target| {
                    (
                        c,
                        MappedClass {
                            target,
                            confidence: 1.0,
                        },
                    )
                })
            })
            .collect();
        Self {
            system: ClassificationSystem::Fbfm40,
            mapping_required: false,
            auto_mappable: true,
            mappings,
            unmapped: Vec::new(),
            coverage: 1.0,
            high_confidence_ratio: 1.0,
            threshold,
            validation_passed: true,
            recommendations: BTreeMap::new(),
        }
    }

    fn unmappable(system: ClassificationSystem, observed: &BTreeSet<i32>, threshold: f32) -> Self {
        Self {
            system,
            mapping_required: true,
            auto_mappable: false,
            mappings: BTreeMap::new(),
            unmapped: observed.iter().copied().collect(),
            coverage: 0.0,
            high_confidence_ratio: 0.0,
            threshold,
            validation_passed: false,
            recommendations: observed.iter().map(|&c| (c, recommend_targets(c))).collect(),
        }
    }
}

impl SystemRegistry {
    /// Plan how `system`'s table maps the observed codes.
    ///
    /// Canonical input gets an identity plan. Unknown schemes, or schemes
    /// without a table, get a plan with every code unmapped.
    pub fn plan_for(
        &self,
        system: ClassificationSystem,
        observed: &BTreeSet<i32>,
        threshold: f32,
    ) -> MappingPlan {
        if system.is_canonical() {
            return MappingPlan::identity(observed, threshold);
        }
        match self.table(system) {
            Some(table) => MappingPlan::for_table(system, &table, observed, threshold),
            None => MappingPlan::unmappable(system, observed, threshold),
        }
    }
}

impl MappingPlan {
    /// Plan an explicit table against the observed codes.
    pub fn for_table(
        system: ClassificationSystem,
        table: &MappingTable,
        observed: &BTreeSet<i32>,
        threshold: f32,
    ) -> Self {
        let mut mappings = BTreeMap::new();
        let mut unmapped = Vec::new();
        let mut high = 0usize;
        for &code in observed {
            match table.lookup(code) {
                Some(mapped) => {
                    if mapped.confidence >= threshold {
                        high += 1;
                    }
                    mappings.insert(code, mapped);
                }
                None => unmapped.push(code),
            }
        }

        let total = observed.len();
        let ratio = |n: usize| if total == 0 { 0.0 } else { n as f64 / total as f64 };
        let coverage = ratio(mappings.len());
        let high_confidence_ratio = ratio(high);
        let validation_passed = table.validate().passed;
        let auto_mappable = coverage >= MIN_COVERAGE
            && high_confidence_ratio >= MIN_HIGH_CONFIDENCE_RATIO
            && validation_passed;

        let recommendations = unmapped.iter().map(|&c| (c, recommend_targets(c))).collect();

        info!(
            system = %system,
            table = %table.name(),
            observed = total,
            mapped = mappings.len(),
            coverage = coverage,
            high_confidence_ratio = high_confidence_ratio,
            auto_mappable = auto_mappable,
            "Mapping plan computed"
        );

        Self {
            system,
            mapping_required: !table.is_identity(),
            auto_mappable,
            mappings,
            unmapped,
            coverage,
            high_confidence_ratio,
            threshold,
            validation_passed,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SystemRegistry {
        SystemRegistry::builtin().unwrap()
    }

    fn codes(c: &[i32]) -> BTreeSet<i32> {
        c.iter().copied().collect()
    }

    #[test]
    fn test_recommendation_bands() {
        assert_eq!(recommend_targets(3)[0].target_code, 101);
        assert_eq!(recommend_targets(15)[0].target_code, 147);
        assert_eq!(recommend_targets(35)[2].target_code, 203);
        assert_eq!(recommend_targets(95)[0].confidence, 0.7);
        assert!(recommend_targets(60).is_empty());
        assert!(recommend_targets(3).len() <= 3);
    }

    #[test]
    fn test_canonical_identity_plan() {
        let plan = registry().plan_for(ClassificationSystem::Fbfm40, &codes(&[98, 183]), 0.8);
        assert!(!plan.mapping_required);
        assert!(plan.auto_mappable);
        assert_eq!(plan.mappings[&183].target, 183);
    }

    #[test]
    fn test_unknown_plan() {
        let plan = registry().plan_for(ClassificationSystem::Unknown, &codes(&[12, 95]), 0.8);
        assert!(!plan.auto_mappable);
        assert_eq!(plan.unmapped, vec![12, 95]);
        assert_eq!(plan.recommendations[&95][0].target_code, 91);
        assert!(!plan.blockers().is_empty());
        assert!(plan.may_proceed(true));
    }

    #[test]
    fn test_esri_full_set_is_not_auto_mappable() {
        // Full coverage but only 4 of 9 classes reach 0.8.
        let plan = registry().plan_for(
            ClassificationSystem::EsriLulc,
            &codes(&[1, 2, 4, 5, 7, 8, 9, 10, 11]),
            DEFAULT_CONFIDENCE_THRESHOLD,
        );
        assert_eq!(plan.coverage, 1.0);
        assert!((plan.high_confidence_ratio - 4.0 / 9.0).abs() < 1e-12);
        assert!(!plan.auto_mappable);
        assert!(!plan.may_proceed(false));
    }

    #[test]
    fn test_lower_threshold_makes_esri_auto_mappable() {
        let plan = registry().plan_for(
            ClassificationSystem::EsriLulc,
            &codes(&[1, 2, 4, 5, 7, 8, 9, 10, 11]),
            0.6,
        );
        assert!(plan.auto_mappable);
        assert!(plan.blockers().is_empty());
    }

    #[test]
    fn test_low_coverage_blocks() {
        let plan = registry().plan_for(
            ClassificationSystem::EsriLulc,
            &codes(&[1, 7, 50, 60, 70]),
            0.8,
        );
        assert!((plan.coverage - 0.4).abs() < 1e-12);
        assert!(!plan.auto_mappable);
        assert_eq!(plan.unmapped, vec![50, 60, 70]);
    }
}
