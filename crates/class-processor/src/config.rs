//! Configuration for the class processor.

use serde::{Deserialize, Serialize};

/// Configuration for remapping, gap filling and sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Rows per streamed block.
    pub block_rows: usize,

    /// Close no-data holes after remapping.
    pub fill_gaps: bool,

    /// Side of the square gap-fill neighbourhood (odd).
    pub gap_fill_window: usize,

    /// Emit a parallel confidence raster.
    pub emit_confidence: bool,

    /// Write the scheme's uncertain code (cloud) as no-data.
    pub uncertain_to_nodata: bool,

    /// Upper bound on pixels inspected when sampling distinct codes.
    pub sample_limit: usize,

    /// Per-code confidence counted as "high" when planning.
    pub confidence_threshold: f32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            block_rows: 256,
            fill_gaps: true,
            gap_fill_window: 3,
            emit_confidence: true,
            uncertain_to_nodata: false,
            sample_limit: 1_000_000,
            confidence_threshold: 0.8,
        }
    }
}

impl ProcessorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Override fields from whichever environment variables are set.
    pub fn with_env(self) -> Self {
        let mut config = self;

        if let Ok(val) = std::env::var("BLOCK_ROWS") {
            if let Ok(rows) = val.parse() {
                config.block_rows = rows;
            }
        }

        if let Ok(val) = std::env::var("FILL_GAPS") {
            config.fill_gaps = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("GAP_FILL_WINDOW") {
            if let Ok(window) = val.parse() {
                config.gap_fill_window = window;
            }
        }

        if let Ok(val) = std::env::var("EMIT_CONFIDENCE") {
            config.emit_confidence = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("CLOUDS_AS_NODATA") {
            config.uncertain_to_nodata = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("SAMPLE_LIMIT") {
            if let Ok(limit) = val.parse() {
                config.sample_limit = limit;
            }
        }

        if let Ok(val) = std::env::var("CONFIDENCE_THRESHOLD") {
            if let Ok(threshold) = val.parse() {
                config.confidence_threshold = threshold;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.block_rows == 0 {
            return Err("block_rows must be > 0".to_string());
        }

        if self.gap_fill_window == 0 || self.gap_fill_window % 2 == 0 {
            return Err(format!(
                "gap_fill_window must be odd and >= 1, got {}",
                self.gap_fill_window
            ));
        }

        if self.sample_limit == 0 {
            return Err("sample_limit must be > 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }

        Ok(())
    }
}

fn parse_flag(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProcessorConfig::default();
        assert_eq!(config.gap_fill_window, 3);
        assert!(config.fill_gaps);
        assert!(!config.uncertain_to_nodata);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_window() {
        let config = ProcessorConfig {
            gap_fill_window: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_threshold() {
        let config = ProcessorConfig {
            confidence_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
