//! Guessing the classification scheme from observed codes.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fbfm40;
use crate::systems::{ClassificationSystem, Magnitude, SystemRegistry};

/// Thresholds for [`ClassificationDetector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum signature overlap for a low-magnitude scheme.
    pub min_signature_overlap: usize,
    /// Exclusive bounds of the three-digit code band.
    pub high_band: (i32, i32),
    /// Largest code a low-magnitude range guess accepts.
    pub low_magnitude_ceiling: i32,
    /// Codes above this suggest the high-magnitude scheme.
    pub high_magnitude_floor: i32,
    /// Codes whose presence supports the low-magnitude range guess.
    pub marker_codes: Vec<i32>,
    /// Scheme picked by the low range guess.
    pub low_range_system: ClassificationSystem,
    /// Scheme picked by the high range guess.
    pub high_range_system: ClassificationSystem,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_signature_overlap: 3,
            high_band: (100, 1000),
            low_magnitude_ceiling: 150,
            high_magnitude_floor: 300,
            marker_codes: vec![10, 20, 30, 100],
            low_range_system: ClassificationSystem::SentinelFuel2024,
            high_range_system: ClassificationSystem::LandfireUs,
        }
    }
}

/// Picks the registered scheme that best explains a set of codes.
///
/// Stages run in a fixed order and the first match wins. Detection never
/// fails; [`ClassificationSystem::Unknown`] means a human has to decide.
#[derive(Debug, Clone)]
pub struct ClassificationDetector {
    registry: Arc<SystemRegistry>,
    config: DetectorConfig,
    canonical: BTreeSet<i32>,
}

impl ClassificationDetector {
    pub fn new(registry: Arc<SystemRegistry>) -> Self {
        Self::with_config(registry, DetectorConfig::default())
    }

    pub fn with_config(registry: Arc<SystemRegistry>, config: DetectorConfig) -> Self {
        Self {
            registry,
            config,
            canonical: fbfm40::valid_codes(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn detect_codes(&self, codes: impl IntoIterator<Item = i32>) -> ClassificationSystem {
        self.detect(&codes.into_iter().collect())
    }

    pub fn detect(&self, codes: &BTreeSet<i32>) -> ClassificationSystem {
        let (Some(&min), Some(&max)) = (codes.first(), codes.last()) else {
            return ClassificationSystem::Unknown;
        };

        let system = self.detect_inner(codes, min, max);
        debug!(
            codes = codes.len(),
            min = min,
            max = max,
            system = %system,
            "Classification system detected"
        );
        system
    }

    fn detect_inner(&self, codes: &BTreeSet<i32>, min: i32, max: i32) -> ClassificationSystem {
        // Three-digit source codes can also be valid FBFM40 codes with other
        // meanings, so a full table match with real remapping goes first.
        if let Some(system) = self.full_high_match(codes) {
            return system;
        }

        // Canonical: every code is an FBFM40 class and at least one burnable.
        if codes.is_subset(&self.canonical)
            && codes.iter().any(|c| fbfm40::BURNABLE_RANGE.contains(c))
        {
            return ClassificationSystem::Fbfm40;
        }

        let (band_lo, band_hi) = self.config.high_band;
        if codes.iter().any(|&c| c > band_lo && c < band_hi) {
            let hit = self
                .candidates(Magnitude::High)
                .find(|(_, sig)| !sig.is_disjoint(codes));
            if let Some((system, _)) = hit {
                return system;
            }
        }

        // Largest overlap wins; `max_by_key` keeps the last maximum, so scan
        // in reverse to keep registry order on ties.
        let best = self
            .candidates(Magnitude::Low)
            .map(|(system, sig)| (system, sig.intersection(codes).count()))
            .filter(|(_, overlap)| *overlap >= self.config.min_signature_overlap)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .max_by_key(|(_, overlap)| *overlap);
        if let Some((system, _)) = best {
            return system;
        }

        if max <= self.config.low_magnitude_ceiling
            && min >= 1
            && self.config.marker_codes.iter().any(|m| codes.contains(m))
        {
            return self.config.low_range_system;
        }
        if max > self.config.high_magnitude_floor {
            return self.config.high_range_system;
        }

        ClassificationSystem::Unknown
    }

    /// High-magnitude scheme whose table has a rule for every observed
    /// code, whose signature overlaps enough, and which would change at
    /// least one of them.
    fn full_high_match(&self, codes: &BTreeSet<i32>) -> Option<ClassificationSystem> {
        self.registry
            .iter()
            .filter(|d| !d.system.is_canonical() && d.magnitude == Magnitude::High)
            .find(|d| {
                d.signature.intersection(codes).count() >= self.config.min_signature_overlap
                    && codes.iter().all(|&c| d.table.rule(c).is_some())
                    && codes
                        .iter()
                        .any(|&c| d.table.rule(c).is_some_and(|r| r.target_code != c))
            })
            .map(|d| d.system)
    }

    fn candidates(
        &self,
        magnitude: Magnitude,
    ) -> impl Iterator<Item = (ClassificationSystem, &BTreeSet<i32>)> {
        self.registry
            .iter()
            .filter(move |d| !d.system.is_canonical() && d.magnitude == magnitude)
            .map(|d| (d.system, &d.signature))
    }
}
