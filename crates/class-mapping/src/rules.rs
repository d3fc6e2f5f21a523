//! Mapping rules and the immutable table that holds them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MappingError, Result};
use crate::fbfm40;
use crate::validation::{SemanticRule, ValidationReport};

/// Output no-data value the descriptions table is keyed with.
const OUTPUT_NODATA: i32 = -9999;

/// One source -> target rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMappingRule {
    pub source_code: i32,
    pub target_code: i32,
    pub confidence: f32,
    pub rationale: String,
}

impl ClassMappingRule {
    pub fn new(
        source_code: i32,
        target_code: i32,
        confidence: f32,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            source_code,
            target_code,
            confidence,
            rationale: rationale.into(),
        }
    }

    pub fn band(&self) -> ConfidenceBand {
        ConfidenceBand::classify(self.confidence)
    }

    fn check(&self) -> Result<()> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(MappingError::InvalidConfidence {
                source_code: self.source_code,
                confidence: self.confidence,
            });
        }
        if i16::try_from(self.target_code).is_err() || self.target_code == OUTPUT_NODATA {
            return Err(MappingError::TargetOutOfRange {
                source_code: self.source_code,
                target_code: self.target_code,
            });
        }
        Ok(())
    }
}

/// Result of looking up a single source code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MappedClass {
    pub target: i16,
    pub confidence: f32,
}

/// Confidence bands used for audit reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub const HIGH_THRESHOLD: f32 = 0.8;
    pub const MEDIUM_THRESHOLD: f32 = 0.6;

    pub fn classify(confidence: f32) -> Self {
        if confidence >= Self::HIGH_THRESHOLD {
            Self::High
        } else if confidence >= Self::MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "high (>= 0.8)",
            Self::Medium => "medium (0.6-0.8)",
            Self::Low => "low (< 0.6)",
        }
    }
}

/// Where a table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Compiled into the binary.
    Builtin,
    /// Read from a mapping document.
    #[default]
    Loaded,
    /// Built for a detected system.
    Detected,
    /// Canonical passthrough.
    Identity,
}

/// Descriptive fields carried alongside the rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub provenance: Provenance,
    pub author: Option<String>,
    pub source_dataset: Option<String>,
    pub target_dataset: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TableMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0".to_string(),
            description: None,
            provenance: Provenance::Builtin,
            author: None,
            source_dataset: None,
            target_dataset: Some("FBFM40".to_string()),
            created_at: Utc::now(),
        }
    }
}

/// A validated, immutable set of rules keyed by unique source code.
///
/// Besides the rules, a table carries the registries its validation runs
/// against: the source codes it is expected to cover, the target codes it
/// may produce, display names, and semantic spot checks.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingTable {
    metadata: TableMetadata,
    rules: BTreeMap<i32, ClassMappingRule>,
    expected_sources: BTreeSet<i32>,
    valid_targets: BTreeSet<i32>,
    descriptions: BTreeMap<i32, String>,
    source_names: BTreeMap<i32, String>,
    semantic_rules: Vec<SemanticRule>,
    uncertain_code: Option<i32>,
}

impl MappingTable {
    pub fn builder(name: impl Into<String>) -> MappingTableBuilder {
        MappingTableBuilder::new(name)
    }

    /// Passthrough table for codes that are already canonical.
    pub fn identity(codes: impl IntoIterator<Item = i32>) -> Result<Self> {
        let mut builder = Self::builder("FBFM40_identity")
            .provenance(Provenance::Identity)
            .description("Canonical codes map onto themselves");
        for code in codes {
            builder = builder.rule(code, code, 1.0, "Already canonical");
        }
        builder.build()
    }

    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn rule(&self, source_code: i32) -> Option<&ClassMappingRule> {
        self.rules.get(&source_code)
    }

    /// Rules in ascending source-code order.
    pub fn rules(&self) -> impl Iterator<Item = &ClassMappingRule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[inline]
    pub fn lookup(&self, source_code: i32) -> Option<MappedClass> {
        // Targets were range-checked on construction.
        self.rules.get(&source_code).map(|r| MappedClass {
            target: r.target_code as i16,
            confidence: r.confidence,
        })
    }

    pub fn apply_to(&self, codes: &[i32]) -> Vec<Option<MappedClass>> {
        codes.iter().map(|&c| self.lookup(c)).collect()
    }

    /// True when every rule maps a code onto itself.
    pub fn is_identity(&self) -> bool {
        self.rules.values().all(|r| r.source_code == r.target_code)
    }

    pub fn expected_sources(&self) -> &BTreeSet<i32> {
        &self.expected_sources
    }

    pub fn valid_targets(&self) -> &BTreeSet<i32> {
        &self.valid_targets
    }

    pub fn descriptions(&self) -> &BTreeMap<i32, String> {
        &self.descriptions
    }

    pub fn description(&self, target_code: i32) -> Option<&str> {
        self.descriptions.get(&target_code).map(String::as_str)
    }

    pub fn source_names(&self) -> &BTreeMap<i32, String> {
        &self.source_names
    }

    pub fn source_name(&self, source_code: i32) -> Option<&str> {
        self.source_names.get(&source_code).map(String::as_str)
    }

    pub fn semantic_rules(&self) -> &[SemanticRule] {
        &self.semantic_rules
    }

    /// The scheme's "no reliable ground cover" code (cloud), if any.
    pub fn uncertain_code(&self) -> Option<i32> {
        self.uncertain_code
    }

    /// Run every validation check. Checks are independent; one failing does
    /// not stop the others.
    pub fn validate(&self) -> ValidationReport {
        let report = ValidationReport::evaluate(self);
        if report.passed {
            debug!(table = %self.metadata.name, rules = self.len(), "Mapping table validated");
        } else {
            for warning in report.warnings() {
                warn!(table = %self.metadata.name, "{}", warning);
            }
        }
        report
    }
}

/// Builder for [`MappingTable`].
///
/// Unset registries default to the FBFM40 code set and descriptions, and
/// the expected sources default to the codes the rules cover.
#[derive(Debug, Clone)]
pub struct MappingTableBuilder {
    metadata: TableMetadata,
    rules: Vec<ClassMappingRule>,
    expected_sources: Option<BTreeSet<i32>>,
    valid_targets: Option<BTreeSet<i32>>,
    descriptions: Option<BTreeMap<i32, String>>,
    source_names: BTreeMap<i32, String>,
    semantic_rules: Vec<SemanticRule>,
    uncertain_code: Option<i32>,
}

impl MappingTableBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: TableMetadata::new(name),
            rules: Vec::new(),
            expected_sources: None,
            valid_targets: None,
            descriptions: None,
            source_names: BTreeMap::new(),
            semantic_rules: Vec::new(),
            uncertain_code: None,
        }
    }

    pub fn metadata(mut self, metadata: TableMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.metadata.provenance = provenance;
        self
    }

    pub fn source_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.metadata.source_dataset = Some(dataset.into());
        self
    }

    pub fn rule(
        mut self,
        source_code: i32,
        target_code: i32,
        confidence: f32,
        rationale: impl Into<String>,
    ) -> Self {
        self.rules
            .push(ClassMappingRule::new(source_code, target_code, confidence, rationale));
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = ClassMappingRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn expected_sources(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.expected_sources = Some(codes.into_iter().collect());
        self
    }

    pub fn valid_targets(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.valid_targets = Some(codes.into_iter().collect());
        self
    }

    pub fn descriptions(mut self, descriptions: BTreeMap<i32, String>) -> Self {
        self.descriptions = Some(descriptions);
        self
    }

    pub fn source_names<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = (i32, S)>,
    ) -> Self {
        self.source_names
            .extend(names.into_iter().map(|(code, name)| (code, name.into())));
        self
    }

    pub fn semantic_rules(mut self, rules: Vec<SemanticRule>) -> Self {
        self.semantic_rules = rules;
        self
    }

    pub fn uncertain_code(mut self, code: Option<i32>) -> Self {
        self.uncertain_code = code;
        self
    }

    /// Check every rule and freeze the table.
    pub fn build(self) -> Result<MappingTable> {
        let mut rules = BTreeMap::new();
        for rule in self.rules {
            rule.check()?;
            let source = rule.source_code;
            if rules.insert(source, rule).is_some() {
                return Err(MappingError::DuplicateSource(source));
            }
        }

        let expected_sources = self
            .expected_sources
            .unwrap_or_else(|| rules.keys().copied().collect());

        Ok(MappingTable {
            metadata: self.metadata,
            rules,
            expected_sources,
            valid_targets: self.valid_targets.unwrap_or_else(fbfm40::valid_codes),
            descriptions: self
                .descriptions
                .unwrap_or_else(|| fbfm40::descriptions(OUTPUT_NODATA)),
            source_names: self.source_names,
            semantic_rules: self.semantic_rules,
            uncertain_code: self.uncertain_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> MappingTable {
        MappingTable::builder("test")
            .rule(1, 98, 0.95, "water")
            .rule(2, 183, 0.55, "trees")
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookup_and_apply() {
        let table = small();
        assert_eq!(
            table.lookup(1),
            Some(MappedClass {
                target: 98,
                confidence: 0.95
            })
        );
        assert_eq!(table.lookup(3), None);

        let applied = table.apply_to(&[2, 3, 1]);
        assert_eq!(applied[0].map(|m| m.target), Some(183));
        assert!(applied[1].is_none());
        assert_eq!(applied[2].map(|m| m.target), Some(98));
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let err = MappingTable::builder("dup")
            .rule(1, 98, 0.9, "a")
            .rule(1, 99, 0.9, "b")
            .build()
            .unwrap_err();
        assert!(matches!(err, MappingError::DuplicateSource(1)));
    }

    #[test]
    fn test_confidence_out_of_range_rejected() {
        let err = MappingTable::builder("bad")
            .rule(1, 98, 1.5, "too sure")
            .build()
            .unwrap_err();
        assert!(matches!(err, MappingError::InvalidConfidence { source_code: 1, .. }));

        assert!(MappingTable::builder("nan")
            .rule(1, 98, f32::NAN, "nan")
            .build()
            .is_err());
    }

    #[test]
    fn test_target_must_fit_int16() {
        let err = MappingTable::builder("wide")
            .rule(1, 40_000, 0.9, "too wide")
            .build()
            .unwrap_err();
        assert!(matches!(err, MappingError::TargetOutOfRange { target_code: 40_000, .. }));

        assert!(MappingTable::builder("sentinel")
            .rule(1, -9999, 0.9, "collides with nodata")
            .build()
            .is_err());
    }

    #[test]
    fn test_defaults_from_rules() {
        let table = small();
        assert_eq!(table.expected_sources().iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert!(table.valid_targets().contains(&183));
        assert_eq!(table.description(-9999), Some("NoData"));
    }

    #[test]
    fn test_identity_table() {
        let table = MappingTable::identity([98, 102, 183]).unwrap();
        assert!(table.is_identity());
        assert_eq!(table.metadata().provenance, Provenance::Identity);
        assert_eq!(table.lookup(102).unwrap().confidence, 1.0);
    }

    #[test]
    fn test_confidence_bands() {
        assert_eq!(ConfidenceBand::classify(0.8), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::classify(0.79), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::classify(0.6), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::classify(0.59), ConfidenceBand::Low);
    }
}
