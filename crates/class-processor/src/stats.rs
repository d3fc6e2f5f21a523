//! Per-class statistics over remapped rasters.

use std::collections::BTreeMap;
use std::io;

use class_mapping::ConfidenceBand;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::{Deserialize, Serialize};

use crate::error::{ProcessorError, Result};

/// One output class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStatistics {
    pub code: i16,
    pub pixel_count: u64,
    /// Share of valid (non no-data) pixels.
    pub percentage: f64,
    pub description: String,
    /// Mean over this class's pixels that carry a confidence.
    pub mean_confidence: Option<f64>,
}

/// Pixel counts per confidence band. Pixels with confidence 0 are excluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBuckets {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub mean: f64,
}

impl ConfidenceBuckets {
    pub fn total(&self) -> u64 {
        self.high + self.medium + self.low
    }
}

/// Summary of one output raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub total_pixels: u64,
    pub valid_pixels: u64,
    pub nodata_pixels: u64,
    pub classes: Vec<ClassStatistics>,
    pub confidence: Option<ConfidenceBuckets>,
}

impl StatisticsReport {
    pub fn class(&self, code: i16) -> Option<&ClassStatistics> {
        self.classes.iter().find(|c| c.code == code)
    }

    /// Class table as a formatted console table.
    pub fn render_table(&self) -> Table {
        let with_conf = self.confidence.is_some();
        let mut table = Table::new();
        let mut header = vec!["Class", "Pixels", "Percent", "Description"];
        if with_conf {
            header.push("Mean confidence");
        }
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(header);

        for class in &self.classes {
            let mut row = vec![
                class.code.to_string(),
                class.pixel_count.to_string(),
                format!("{:.2}%", class.percentage),
                class.description.clone(),
            ];
            if with_conf {
                row.push(
                    class
                        .mean_confidence
                        .map(|c| format!("{:.2}", c))
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
            table.add_row(row);
        }
        table
    }

    /// Human-readable report: class table, no-data count and confidence bands.
    pub fn write_text<W: io::Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, "{}", self.render_table())?;
        writeln!(
            out,
            "Valid pixels: {}  NoData pixels: {}  Total: {}",
            self.valid_pixels, self.nodata_pixels, self.total_pixels
        )?;
        if let Some(c) = &self.confidence {
            let total = c.total().max(1) as f64;
            writeln!(out, "Confidence (mean {:.3}):", c.mean)?;
            for (band, n) in [
                (ConfidenceBand::High, c.high),
                (ConfidenceBand::Medium, c.medium),
                (ConfidenceBand::Low, c.low),
            ] {
                writeln!(
                    out,
                    "  {:<18} {:>12} ({:.1}%)",
                    band.label(),
                    n,
                    n as f64 / total * 100.0
                )?;
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Aggregates statistics block by block.
#[derive(Debug, Clone)]
pub struct StatisticsAccumulator {
    sentinel: i16,
    counts: BTreeMap<i16, u64>,
    conf_sums: BTreeMap<i16, (f64, u64)>,
    nodata: u64,
    buckets: Option<ConfidenceBuckets>,
    conf_sum: f64,
}

impl StatisticsAccumulator {
    pub fn new(sentinel: i16) -> Self {
        Self {
            sentinel,
            counts: BTreeMap::new(),
            conf_sums: BTreeMap::new(),
            nodata: 0,
            buckets: None,
            conf_sum: 0.0,
        }
    }

    /// Add one block of codes, with its confidence if there is one.
    pub fn add_block(&mut self, codes: &[i16], confidence: Option<&[f32]>) -> Result<()> {
        if let Some(conf) = confidence {
            ProcessorError::check_len(codes.len(), conf.len())?;
        }

        for (i, &code) in codes.iter().enumerate() {
            if code == self.sentinel {
                self.nodata += 1;
                continue;
            }
            *self.counts.entry(code).or_insert(0) += 1;

            let Some(conf) = confidence else { continue };
            let c = conf[i];
            if c <= 0.0 {
                continue;
            }
            let entry = self.conf_sums.entry(code).or_insert((0.0, 0));
            entry.0 += c as f64;
            entry.1 += 1;
        }

        if let Some(conf) = confidence {
            let buckets = self.buckets.get_or_insert_with(ConfidenceBuckets::default);
            for &c in conf.iter().filter(|c| **c > 0.0) {
                match ConfidenceBand::classify(c) {
                    ConfidenceBand::High => buckets.high += 1,
                    ConfidenceBand::Medium => buckets.medium += 1,
                    ConfidenceBand::Low => buckets.low += 1,
                }
                self.conf_sum += c as f64;
            }
        }
        Ok(())
    }

    pub fn finish(self, descriptions: &BTreeMap<i32, String>) -> StatisticsReport {
        let valid: u64 = self.counts.values().sum();
        let classes = self
            .counts
            .iter()
            .map(|(&code, &n)| ClassStatistics {
                code,
                pixel_count: n,
                percentage: if valid == 0 {
                    0.0
                } else {
                    n as f64 / valid as f64 * 100.0
                },
                description: descriptions
                    .get(&(code as i32))
                    .cloned()
                    .unwrap_or_else(|| format!("Class {}", code)),
                mean_confidence: self
                    .conf_sums
                    .get(&code)
                    .filter(|(_, k)| *k > 0)
                    .map(|(sum, k)| sum / *k as f64),
            })
            .collect();

        let confidence = self.buckets.map(|mut b| {
            let total = b.total();
            b.mean = if total == 0 {
                0.0
            } else {
                self.conf_sum / total as f64
            };
            b
        });

        StatisticsReport {
            total_pixels: valid + self.nodata,
            valid_pixels: valid,
            nodata_pixels: self.nodata,
            classes,
            confidence,
        }
    }
}

/// Summarize a whole buffer.
pub fn summarize(
    buffer: &[i16],
    sentinel: i16,
    descriptions: &BTreeMap<i32, String>,
    confidence: Option<&[f32]>,
) -> Result<StatisticsReport> {
    let mut acc = StatisticsAccumulator::new(sentinel);
    acc.add_block(buffer, confidence)?;
    Ok(acc.finish(descriptions))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptions() -> BTreeMap<i32, String> {
        BTreeMap::from([
            (98, "NB8 - Open Water".to_string()),
            (183, "TL3 - Moderate load conifer litter".to_string()),
        ])
    }

    #[test]
    fn test_counts_and_percentages() {
        let report = summarize(&[98, 98, 183, -9999], -9999, &descriptions(), None).unwrap();
        assert_eq!(report.total_pixels, 4);
        assert_eq!(report.nodata_pixels, 1);
        let water = report.class(98).unwrap();
        assert_eq!(water.pixel_count, 2);
        assert!((water.percentage - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(water.description, "NB8 - Open Water");
        assert!(report.confidence.is_none());
    }

    #[test]
    fn test_confidence_buckets_skip_zero() {
        let conf = [0.95, 0.95, 0.55, 0.0, 0.7];
        let report =
            summarize(&[98, 98, 183, -9999, 91], -9999, &descriptions(), Some(&conf)).unwrap();
        let buckets = report.confidence.as_ref().unwrap();
        assert_eq!((buckets.high, buckets.medium, buckets.low), (2, 1, 1));
        assert!((buckets.mean - (0.95 + 0.95 + 0.55 + 0.7) / 4.0).abs() < 1e-6);
        assert!((report.class(98).unwrap().mean_confidence.unwrap() - 0.95).abs() < 1e-6);
        assert_eq!(report.class(91).unwrap().description, "Class 91");
    }

    #[test]
    fn test_blocks_accumulate() {
        let mut acc = StatisticsAccumulator::new(-9999);
        acc.add_block(&[98, 183], Some(&[0.9, 0.5])).unwrap();
        acc.add_block(&[98], Some(&[0.9])).unwrap();
        let report = acc.finish(&descriptions());
        assert_eq!(report.class(98).unwrap().pixel_count, 2);
        assert_eq!(report.confidence.unwrap().total(), 3);
    }

    #[test]
    fn test_mismatched_confidence_rejected() {
        let mut acc = StatisticsAccumulator::new(-9999);
        assert!(acc.add_block(&[98, 183], Some(&[0.9])).is_err());
    }

    #[test]
    fn test_text_report_renders() {
        let conf = [0.95, 0.55];
        let report = summarize(&[98, 183], -9999, &descriptions(), Some(&conf)).unwrap();
        let mut out = Vec::new();
        report.write_text(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("NB8 - Open Water"));
        assert!(text.contains("Mean confidence"));
        assert!(text.contains("high (>= 0.8)"));
    }
}
