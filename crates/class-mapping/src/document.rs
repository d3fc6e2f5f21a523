//! Mapping documents: the on-disk form of a [`MappingTable`].
//!
//! Documents are JSON or YAML, picked by file extension. Older documents
//! name the rule fields `source_class`/`target_class` and may omit
//! confidence or rationale; both spellings load.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{MappingError, Result};
use crate::rules::{ClassMappingRule, MappingTable, Provenance, TableMetadata};
use crate::validation::{SemanticRule, ValidationReport};

/// Serialization format of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(MappingError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_confidence() -> f32 {
    0.5
}

fn default_rationale() -> String {
    "No rationale provided".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, alias = "creation_date", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_dataset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_dataset: Option<String>,
}

/// One rule as written in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    #[serde(alias = "source_class")]
    pub source_code: i32,
    #[serde(alias = "target_class")]
    pub target_code: i32,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_rationale")]
    pub rationale: String,
}

impl From<&ClassMappingRule> for RuleRecord {
    fn from(rule: &ClassMappingRule) -> Self {
        Self {
            source_code: rule.source_code,
            target_code: rule.target_code,
            confidence: rule.confidence,
            rationale: rule.rationale.clone(),
        }
    }
}

impl From<RuleRecord> for ClassMappingRule {
    fn from(record: RuleRecord) -> Self {
        ClassMappingRule::new(
            record.source_code,
            record.target_code,
            record.confidence,
            record.rationale,
        )
    }
}

/// Persisted mapping table plus its last validation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingDocument {
    pub metadata: DocumentMetadata,
    pub mappings: Vec<RuleRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    #[serde(default, alias = "valid_fbfm40_classes", skip_serializing_if = "Option::is_none")]
    pub valid_target_codes: Option<Vec<i32>>,
    #[serde(default, alias = "expected_source_classes", skip_serializing_if = "Option::is_none")]
    pub expected_source_codes: Option<Vec<i32>>,
    #[serde(default, alias = "fbfm40_descriptions", skip_serializing_if = "Option::is_none")]
    pub descriptions: Option<BTreeMap<i32, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_names: Option<BTreeMap<i32, String>>,
    /// Absent means the ESRI defaults; an empty list disables the check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_rules: Option<Vec<SemanticRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertain_code: Option<i32>,
}

impl MappingDocument {
    /// Capture a table, and optionally the report of its last validation.
    pub fn from_table(table: &MappingTable, validation: Option<ValidationReport>) -> Self {
        let meta = table.metadata();
        Self {
            metadata: DocumentMetadata {
                name: meta.name.clone(),
                version: meta.version.clone(),
                description: meta.description.clone(),
                provenance: meta.provenance,
                author: meta.author.clone(),
                created_at: Some(meta.created_at),
                source_dataset: meta.source_dataset.clone(),
                target_dataset: meta.target_dataset.clone(),
            },
            mappings: table.rules().map(RuleRecord::from).collect(),
            validation,
            valid_target_codes: Some(table.valid_targets().iter().copied().collect()),
            expected_source_codes: Some(table.expected_sources().iter().copied().collect()),
            descriptions: Some(table.descriptions().clone()),
            source_names: Some(table.source_names().clone()),
            semantic_rules: Some(table.semantic_rules().to_vec()),
            uncertain_code: table.uncertain_code(),
        }
    }

    /// Build the immutable table this document describes.
    pub fn into_table(self) -> Result<MappingTable> {
        let meta = self.metadata;
        let metadata = TableMetadata {
            name: meta.name,
            version: meta.version,
            description: meta.description,
            provenance: meta.provenance,
            author: meta.author,
            source_dataset: meta.source_dataset,
            target_dataset: meta.target_dataset,
            created_at: meta.created_at.unwrap_or_else(Utc::now),
        };

        let mut builder = MappingTable::builder(metadata.name.clone())
            .metadata(metadata)
            .rules(self.mappings.into_iter().map(ClassMappingRule::from))
            .semantic_rules(self.semantic_rules.unwrap_or_else(SemanticRule::esri_defaults))
            .uncertain_code(self.uncertain_code);
        if let Some(codes) = self.valid_target_codes {
            builder = builder.valid_targets(codes);
        }
        if let Some(codes) = self.expected_source_codes {
            builder = builder.expected_sources(codes);
        }
        if let Some(descriptions) = self.descriptions {
            builder = builder.descriptions(descriptions);
        }
        if let Some(names) = self.source_names {
            builder = builder.source_names(names);
        }
        builder.build()
    }

    pub fn parse(text: &str, format: DocumentFormat) -> Result<Self> {
        Ok(match format {
            DocumentFormat::Json => serde_json::from_str(text)?,
            DocumentFormat::Yaml => serde_yaml::from_str(text)?,
        })
    }

    pub fn render(&self, format: DocumentFormat) -> Result<String> {
        Ok(match format {
            DocumentFormat::Json => serde_json::to_string_pretty(self)?,
            DocumentFormat::Yaml => serde_yaml::to_string(self)?,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = DocumentFormat::from_path(path)?;
        let text = fs::read_to_string(path)?;
        let doc = Self::parse(&text, format)?;
        info!(
            path = %path.display(),
            name = %doc.metadata.name,
            rules = doc.mappings.len(),
            "Loaded mapping document"
        );
        Ok(doc)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = self.render(DocumentFormat::from_path(path)?)?;
        fs::write(path, text)?;
        info!(path = %path.display(), rules = self.mappings.len(), "Saved mapping document");
        Ok(())
    }
}

/// Load a document and build its table in one step.
pub fn load_table(path: impl AsRef<Path>) -> Result<MappingTable> {
    MappingDocument::load(path)?.into_table()
}

/// Markdown description of a table for reviewers.
pub fn to_markdown(table: &MappingTable, report: Option<&ValidationReport>) -> String {
    let meta = table.metadata();
    let mut doc = String::new();
    let _ = writeln!(doc, "# {} Class Mapping\n", meta.name);
    let _ = writeln!(doc, "**Generated:** {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(doc, "**Version:** {}\n", meta.version);
    if let Some(description) = &meta.description {
        let _ = writeln!(doc, "{}\n", description);
    }

    doc.push_str("## Mapping Table\n\n");
    doc.push_str("| Source Class | Source Name | Target Class | Target Name | Confidence | Rationale |\n");
    doc.push_str("|---|---|---|---|---|---|\n");
    for rule in table.rules() {
        let source_name = table
            .source_name(rule.source_code)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Class_{}", rule.source_code));
        let target_name = table
            .description(rule.target_code)
            .map(str::to_string)
            .unwrap_or_else(|| format!("FBFM_{}", rule.target_code));
        let _ = writeln!(
            doc,
            "| {} | {} | {} | {} | {:.2} | {} |",
            rule.source_code,
            source_name,
            rule.target_code,
            target_name,
            rule.confidence,
            rule.rationale.replace('|', "\\|")
        );
    }

    if let Some(report) = report {
        doc.push_str("\n## Validation Summary\n\n");
        for (name, passed) in report.checks() {
            let _ = writeln!(doc, "- **{}**: {}", name, if passed { "PASS" } else { "FAIL" });
        }
        let c = &report.confidence;
        let _ = writeln!(
            doc,
            "- **Confidence**: mean {:.2}, high {}, medium {}, low {}",
            c.mean, c.high, c.medium, c.low
        );
        for warning in report.warnings() {
            let _ = writeln!(doc, "\n> {}", warning);
        }
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_JSON: &str = r#"{
        "metadata": {"name": "legacy", "version": "2.0", "creation_date": "2024-06-01T12:00:00Z"},
        "mappings": [
            {"source_class": 1, "target_class": 98, "confidence": 0.95, "rationale": "water"},
            {"source_class": 7, "target_class": 91}
        ],
        "expected_source_classes": [1, 7, 11],
        "fbfm40_descriptions": {"98": "NB8 - Open Water", "91": "NB1 - Urban/Developed"}
    }"#;

    #[test]
    fn test_legacy_aliases_and_defaults() {
        let doc = MappingDocument::parse(LEGACY_JSON, DocumentFormat::Json).unwrap();
        assert_eq!(doc.mappings[1].confidence, 0.5);
        assert_eq!(doc.mappings[1].rationale, "No rationale provided");

        let table = doc.into_table().unwrap();
        assert_eq!(table.lookup(7).unwrap().target, 91);
        assert_eq!(table.description(98), Some("NB8 - Open Water"));
        assert_eq!(table.semantic_rules().len(), 3);

        let report = table.validate();
        assert!(!report.passed);
        assert_eq!(report.missing_sources, vec![11]);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(DocumentFormat::from_path(Path::new("a.JSON")).unwrap(), DocumentFormat::Json);
        assert_eq!(DocumentFormat::from_path(Path::new("a.yml")).unwrap(), DocumentFormat::Yaml);
        assert!(matches!(
            DocumentFormat::from_path(Path::new("a.toml")),
            Err(MappingError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_invalid_document() {
        let err = MappingDocument::parse("{\"mappings\": []}", DocumentFormat::Json).unwrap_err();
        assert!(matches!(err, MappingError::InvalidDocument(_)));
    }

    #[test]
    fn test_markdown_lists_every_rule() {
        let table = MappingTable::builder("md")
            .rule(1, 98, 0.95, "water")
            .rule(2, 183, 0.55, "a | b")
            .source_names([(1, "Water")])
            .build()
            .unwrap();
        let md = to_markdown(&table, Some(&table.validate()));
        assert!(md.contains("| 1 | Water | 98 | NB8 - Open Water | 0.95 | water |"));
        assert!(md.contains("| 2 | Class_2 | 183 |"));
        assert!(md.contains("a \\| b"));
        assert!(md.contains("**Completeness**: PASS"));
    }
}
