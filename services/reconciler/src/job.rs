//! Job descriptions: one input raster, one output, and how to get there.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use class_mapping::document::load_table;
use class_mapping::ClassificationSystem;
use class_processor::MappingSource;
use landcover_common::Crs;
use projection::CategoricalResampling;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Per-job settings shared by single runs and batch manifests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Source scheme by name (`esri`, `sentinel`, `landfire`, `fbfm40`);
    /// detected from the raster when absent.
    pub system: Option<String>,

    /// JSON or YAML mapping document to use instead of a built-in table.
    pub mapping_table: Option<PathBuf>,

    /// Output CRS, e.g. `EPSG:5070`.
    pub target_crs: Option<String>,

    /// Output pixel size in target CRS units.
    pub resolution: Option<f64>,

    /// Snap the output to the LANDFIRE CONUS 30 m lattice.
    pub align_landfire: bool,

    /// Snap the output to this raster's lattice.
    pub reference: Option<PathBuf>,

    pub resampling: CategoricalResampling,

    /// Proceed even when the mapping plan is not auto-mappable.
    pub force: bool,

    /// Write a JSON report next to the output.
    pub write_report: bool,
}

/// One reconciliation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(flatten)]
    pub options: JobOptions,
}

impl JobSpec {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            options: JobOptions::default(),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// `<stem>_confidence.tif` beside the output.
    pub fn confidence_path(&self) -> PathBuf {
        sibling(&self.output, "confidence", "tif")
    }

    /// `<stem>_report.json` beside the output.
    pub fn report_path(&self) -> PathBuf {
        sibling(&self.output, "report", "json")
    }

    /// Where the mapping table comes from.
    pub fn mapping_source(&self) -> Result<MappingSource> {
        match (&self.options.mapping_table, &self.options.system) {
            (Some(_), Some(_)) => Err(PipelineError::config(
                "set either a mapping table or a classification system, not both",
            )),
            (Some(path), None) => Ok(MappingSource::Table(Arc::new(load_table(path)?))),
            (None, Some(name)) => Ok(MappingSource::System(name.parse::<ClassificationSystem>()?)),
            (None, None) => Ok(MappingSource::Detect),
        }
    }

    /// Explicit output CRS, if one was given.
    pub fn target_crs(&self) -> Result<Option<Crs>> {
        self.options
            .target_crs
            .as_deref()
            .map(|s| Crs::from_user_string(s).map_err(|e| PipelineError::config(e.to_string())))
            .transpose()
    }

    /// Whether the output grid differs from the input grid.
    pub fn warps(&self) -> bool {
        let o = &self.options;
        o.target_crs.is_some() || o.resolution.is_some() || o.align_landfire || o.reference.is_some()
    }
}

fn sibling(path: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!("{}_{}.{}", stem, suffix, extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_paths() {
        let job = JobSpec::new("in/esri.tif", "out/fbfm40.tif");
        assert_eq!(job.confidence_path(), PathBuf::from("out/fbfm40_confidence.tif"));
        assert_eq!(job.report_path(), PathBuf::from("out/fbfm40_report.json"));
    }

    #[test]
    fn test_mapping_source() {
        let mut job = JobSpec::new("a.tif", "b.tif");
        assert!(matches!(job.mapping_source().unwrap(), MappingSource::Detect));

        job.options.system = Some("esri".to_string());
        assert!(matches!(
            job.mapping_source().unwrap(),
            MappingSource::System(ClassificationSystem::EsriLulc)
        ));

        job.options.mapping_table = Some(PathBuf::from("table.json"));
        assert!(matches!(job.mapping_source(), Err(PipelineError::Config(_))));

        job.options.mapping_table = None;
        job.options.system = Some("modis".to_string());
        assert!(matches!(job.mapping_source(), Err(PipelineError::Mapping(_))));
    }

    #[test]
    fn test_flattened_yaml() {
        let yaml = "input: a.tif\noutput: b.tif\ntarget_crs: EPSG:5070\nalign_landfire: true\nresampling: mode\n";
        let job: JobSpec = serde_yaml::from_str(yaml).unwrap();
        assert!(job.warps());
        assert_eq!(job.options.resampling, CategoricalResampling::Mode);
        assert_eq!(job.target_crs().unwrap(), Some(Crs::Epsg(5070)));
        assert!(!job.options.force);
    }
}
