//! Independent validation checks over a mapping table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::{ConfidenceBand, MappingTable};

/// A spot check that a source code maps only onto an allowed set of targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticRule {
    pub source_code: i32,
    pub allowed_targets: Vec<i32>,
    #[serde(default)]
    pub label: String,
}

impl SemanticRule {
    pub fn new(source_code: i32, allowed_targets: Vec<i32>, label: impl Into<String>) -> Self {
        Self {
            source_code,
            allowed_targets,
            label: label.into(),
        }
    }

    /// Water, built area and snow for the ESRI land-cover scheme.
    pub fn esri_defaults() -> Vec<Self> {
        vec![
            Self::new(1, vec![98], "water maps only to open water"),
            Self::new(7, vec![91], "built area maps only to urban"),
            Self::new(9, vec![92], "snow/ice maps only to snow/ice"),
        ]
    }
}

/// A semantic rule the table breaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticViolation {
    pub source_code: i32,
    pub target_code: i32,
    pub allowed_targets: Vec<i32>,
    pub label: String,
}

/// Pass/fail plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub passed: bool,
    pub message: String,
}

impl CheckOutcome {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }
}

/// Rule counts per confidence band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub mean: f64,
    pub total: usize,
}

impl ConfidenceDistribution {
    pub fn from_confidences(confidences: impl IntoIterator<Item = f32>) -> Self {
        let mut dist = Self::default();
        let mut sum = 0.0f64;
        for c in confidences {
            match ConfidenceBand::classify(c) {
                ConfidenceBand::High => dist.high += 1,
                ConfidenceBand::Medium => dist.medium += 1,
                ConfidenceBand::Low => dist.low += 1,
            }
            sum += c as f64;
            dist.total += 1;
        }
        if dist.total > 0 {
            dist.mean = sum / dist.total as f64;
        }
        dist
    }
}

/// Outcome of [`MappingTable::validate`].
///
/// Only completeness and target validity decide `passed`; semantic
/// violations are warnings and the confidence distribution is audit data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub completeness: CheckOutcome,
    pub missing_sources: Vec<i32>,
    pub target_validity: CheckOutcome,
    pub invalid_targets: Vec<i32>,
    pub semantic: CheckOutcome,
    pub semantic_violations: Vec<SemanticViolation>,
    pub confidence: ConfidenceDistribution,
    pub validated_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn evaluate(table: &MappingTable) -> Self {
        let missing_sources: Vec<i32> = table
            .expected_sources()
            .iter()
            .copied()
            .filter(|code| table.rule(*code).is_none())
            .collect();
        let completeness = if missing_sources.is_empty() {
            CheckOutcome::pass("all expected source codes are mapped")
        } else {
            CheckOutcome::fail(format!(
                "missing rules for source codes: {}",
                join(&missing_sources)
            ))
        };

        let mut invalid_targets: Vec<i32> = table
            .rules()
            .map(|r| r.target_code)
            .filter(|t| !table.valid_targets().contains(t))
            .collect();
        invalid_targets.sort_unstable();
        invalid_targets.dedup();
        let target_validity = if invalid_targets.is_empty() {
            CheckOutcome::pass("all target codes are valid FBFM40 classes")
        } else {
            CheckOutcome::fail(format!("invalid target codes: {}", join(&invalid_targets)))
        };

        let semantic_violations: Vec<SemanticViolation> = table
            .semantic_rules()
            .iter()
            .filter_map(|sr| {
                let rule = table.rule(sr.source_code)?;
                (!sr.allowed_targets.contains(&rule.target_code)).then(|| SemanticViolation {
                    source_code: sr.source_code,
                    target_code: rule.target_code,
                    allowed_targets: sr.allowed_targets.clone(),
                    label: sr.label.clone(),
                })
            })
            .collect();
        let semantic = if semantic_violations.is_empty() {
            CheckOutcome::pass("all mappings follow the semantic rules")
        } else {
            let listed: Vec<String> = semantic_violations
                .iter()
                .map(|v| format!("{} -> {}", v.source_code, v.target_code))
                .collect();
            CheckOutcome::fail(format!("questionable mappings: {}", listed.join(", ")))
        };

        let confidence = ConfidenceDistribution::from_confidences(table.rules().map(|r| r.confidence));

        Self {
            passed: completeness.passed && target_validity.passed,
            completeness,
            missing_sources,
            target_validity,
            invalid_targets,
            semantic,
            semantic_violations,
            confidence,
            validated_at: Utc::now(),
        }
    }

    /// Named checks in report order.
    pub fn checks(&self) -> [(&'static str, bool); 3] {
        [
            ("Completeness", self.completeness.passed),
            ("Target validity", self.target_validity.passed),
            ("Semantic logic", self.semantic.passed),
        ]
    }

    /// Messages for every failed check, fatal or not.
    pub fn warnings(&self) -> Vec<String> {
        [&self.completeness, &self.target_validity, &self.semantic]
            .into_iter()
            .filter(|c| !c.passed)
            .map(|c| c.message.clone())
            .collect()
    }
}

fn join(codes: &[i32]) -> String {
    codes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_bands_and_mean() {
        let dist = ConfidenceDistribution::from_confidences([0.95, 0.6, 0.2, 0.8]);
        assert_eq!((dist.high, dist.medium, dist.low, dist.total), (2, 1, 1, 4));
        assert!((dist.mean - 0.6375).abs() < 1e-6);
    }

    #[test]
    fn test_empty_distribution() {
        let dist = ConfidenceDistribution::from_confidences(std::iter::empty());
        assert_eq!(dist.total, 0);
        assert_eq!(dist.mean, 0.0);
    }

    #[test]
    fn test_semantic_violation_is_warning_only() {
        let table = MappingTable::builder("odd")
            .rule(1, 183, 0.9, "water as litter")
            .rule(7, 91, 0.9, "built")
            .semantic_rules(SemanticRule::esri_defaults())
            .build()
            .unwrap();
        let report = table.validate();
        assert!(report.passed);
        assert!(!report.semantic.passed);
        assert_eq!(report.semantic_violations.len(), 1);
        assert_eq!(report.semantic_violations[0].target_code, 183);
        assert_eq!(report.warnings().len(), 1);
    }

    #[test]
    fn test_invalid_target_fails() {
        let table = MappingTable::builder("bad target")
            .rule(1, 100, 0.9, "not a fuel model")
            .rule(2, 100, 0.9, "same")
            .build()
            .unwrap();
        let report = table.validate();
        assert!(!report.passed);
        assert_eq!(report.invalid_targets, vec![100]);
        assert!(report.completeness.passed);
    }
}
