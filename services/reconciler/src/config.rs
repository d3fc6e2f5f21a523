//! Reconciler configuration.
//!
//! Defaults, then an optional YAML file, then environment variables.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use class_processor::ProcessorConfig;
use projection::ReprojectorConfig;
use raster_io::GeoTiffConfig;
use serde::{Deserialize, Serialize};

/// Top-level reconciler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Remap, gap fill and sampling settings
    pub processor: ProcessorConfig,

    /// CRS resolution and warp settings
    pub reprojector: ReprojectorConfig,

    /// GeoTIFF reader settings
    pub geotiff: GeoTiffConfig,

    /// Parent of the per-run scratch directories
    pub scratch_dir: PathBuf,

    /// Wall-clock budget per batch job (seconds)
    pub job_timeout_secs: u64,

    /// Jobs running at once in batch mode
    pub max_concurrent_jobs: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            processor: ProcessorConfig::default(),
            reprojector: ReprojectorConfig::default(),
            geotiff: GeoTiffConfig::default(),
            scratch_dir: env::temp_dir().join("landcover-reconcile"),
            job_timeout_secs: 3600,
            max_concurrent_jobs: 2,
        }
    }
}

impl ReconcilerConfig {
    /// Load from a YAML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_yaml(path)?,
            None => Self::default(),
        };
        Ok(base.with_env())
    }

    /// Load configuration from a YAML file; missing keys keep defaults.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    fn with_env(mut self) -> Self {
        self.processor = self.processor.with_env();

        if let Ok(dir) = env::var("SCRATCH_DIR") {
            self.scratch_dir = PathBuf::from(dir);
        }

        if let Ok(val) = env::var("JOB_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.job_timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("MAX_CONCURRENT_JOBS") {
            if let Ok(n) = val.parse() {
                self.max_concurrent_jobs = n;
            }
        }

        if let Ok(val) = env::var("CRS_ALLOW_FALLBACK") {
            self.reprojector.allow_fallback = parse_flag(&val);
        }

        if let Ok(val) = env::var("CRS_NETWORK_LOOKUP") {
            self.reprojector.network_lookup = parse_flag(&val);
        }

        if let Ok(val) = env::var("GEOTIFF_CACHE_MB") {
            if let Ok(mb) = val.parse::<usize>() {
                self.geotiff.cache_bytes = mb * 1024 * 1024;
            }
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.processor.validate()?;

        if self.job_timeout_secs == 0 {
            return Err("job_timeout_secs must be > 0".to_string());
        }

        if self.max_concurrent_jobs == 0 {
            return Err("max_concurrent_jobs must be > 0".to_string());
        }

        if self.geotiff.cache_bytes == 0 {
            return Err("geotiff.cache_bytes must be > 0".to_string());
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
    fn test_default_config_is_valid() {
        let config = ReconcilerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent_jobs, 2);
        assert!(config.reprojector.allow_fallback);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconciler.yaml");
        std::fs::write(
            &path,
            "job_timeout_secs: 60\nprocessor:\n  fill_gaps: false\n  gap_fill_window: 5\n",
        )
        .unwrap();

        let config = ReconcilerConfig::from_yaml(&path).unwrap();
        assert_eq!(config.job_timeout_secs, 60);
        assert!(!config.processor.fill_gaps);
        assert_eq!(config.processor.gap_fill_window, 5);
        assert_eq!(config.processor.block_rows, 256);
        assert_eq!(config.max_concurrent_jobs, 2);
    }

    #[test]
    fn test_validate_rejects_zero_jobs() {
        let config = ReconcilerConfig {
            max_concurrent_jobs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ReconcilerConfig {
            processor: ProcessorConfig {
                gap_fill_window: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
