//! Per-job report: what was selected, what was written, and the class
//! statistics of the output.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use class_mapping::{ClassificationSystem, MappingPlan};
use class_processor::StatisticsReport;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use landcover_common::Crs;
use projection::AlignmentCheck;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub backend: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub confidence_output: Option<PathBuf>,
    pub system: ClassificationSystem,
    pub table: String,
    /// The plan was not auto-mappable and the run was forced.
    pub forced: bool,
    pub plan: MappingPlan,
    pub width: usize,
    pub height: usize,
    pub crs: Crs,
    pub unmapped_count: u64,
    pub unmapped_codes: BTreeSet<i32>,
    pub uncertain_count: u64,
    pub filled_count: u64,
    /// Outputs whose CRS had to be rewritten after the write.
    pub crs_repaired: Vec<PathBuf>,
    pub alignment: Option<AlignmentCheck>,
    pub statistics: StatisticsReport,
    pub warnings: Vec<String>,
}

impl JobReport {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Summary table followed by the class statistics and any warnings.
    pub fn write_text<W: io::Write>(&self, mut out: W) -> io::Result<()> {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec!["Field", "Value"]);
        let rows: Vec<(&str, String)> = vec![
            ("Run", self.run_id.to_string()),
            ("Input", self.input.display().to_string()),
            ("Output", self.output.display().to_string()),
            ("System", self.system.to_string()),
            ("Table", self.table.clone()),
            ("Forced", self.forced.to_string()),
            ("Grid", format!("{} x {} ({})", self.width, self.height, self.crs.name())),
            ("Coverage", format!("{:.1}%", self.plan.coverage * 100.0)),
            ("Unmapped pixels", self.unmapped_count.to_string()),
            ("Uncertain pixels", self.uncertain_count.to_string()),
            ("Filled pixels", self.filled_count.to_string()),
            ("Duration", format!("{} ms", self.duration_ms())),
        ];
        for (field, value) in rows {
            table.add_row(vec![field.to_string(), value]);
        }
        if let Some(check) = &self.alignment {
            table.add_row(vec![
                "Alignment".to_string(),
                format!(
                    "{} (offset {:.3e}, {:.3e})",
                    if check.aligned { "aligned" } else { "OFF LATTICE" },
                    check.offset_x,
                    check.offset_y
                ),
            ]);
        }
        writeln!(out, "{}", table)?;

        self.statistics.write_text(&mut out)?;

        if !self.warnings.is_empty() {
            writeln!(out, "Warnings:")?;
            for w in &self.warnings {
                writeln!(out, "  - {}", w)?;
            }
        }
        Ok(())
    }

    pub fn save_json(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)
    }
}
