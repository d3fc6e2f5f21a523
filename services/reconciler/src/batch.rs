//! Batch runs from a YAML manifest.
//!
//! Jobs run on blocking threads, at most `max_concurrent_jobs` at once,
//! each under a wall-clock timeout. A job that times out is cancelled and
//! awaited before its slot is released, so it leaves no outputs behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use serde::{Deserialize, Serialize};
use raster_io::cleanup;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::job::{JobOptions, JobSpec};
use crate::pipeline::ReconcilePipeline;

/// Every GeoTIFF under `input_dir`, written with the same file name under
/// `output_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryJob {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub recursive: bool,
    #[serde(flatten)]
    pub options: JobOptions,
}

/// Jobs listed one by one and directories to expand into jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchManifest {
    pub jobs: Vec<JobSpec>,
    pub directories: Vec<DirectoryJob>,
}

impl BatchManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))
    }

    /// Listed jobs followed by the directory jobs, sorted by input path
    /// within each directory.
    pub fn expand(&self) -> Result<Vec<JobSpec>> {
        let mut jobs = self.jobs.clone();
        for dir in &self.directories {
            let depth = if dir.recursive { usize::MAX } else { 1 };
            let mut found = Vec::new();
            for entry in WalkDir::new(&dir.input_dir).max_depth(depth) {
                let entry = entry.with_context(|| {
                    format!("Failed to scan directory: {}", dir.input_dir.display())
                })?;
                if entry.file_type().is_file() && is_geotiff(entry.path()) {
                    found.push(entry.into_path());
                }
            }
            found.sort();

            for input in found {
                let relative = input.strip_prefix(&dir.input_dir).with_context(|| {
                    format!("{} is outside {}", input.display(), dir.input_dir.display())
                })?;
                let output = dir.output_dir.join(relative);
                jobs.push(JobSpec::new(input, output).with_options(dir.options.clone()));
            }
        }
        Ok(jobs)
    }
}

fn is_geotiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded { warnings: usize },
    Failed { kind: String, error: String },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(flatten)]
    pub status: JobStatus,
    pub duration_ms: u64,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded { .. })
    }
}

/// Outcome of every job of a batch, in manifest order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<JobOutcome>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn render_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_header(vec!["Input", "Status", "Detail", "Duration"]);
        for o in &self.outcomes {
            let (status, detail) = match &o.status {
                JobStatus::Succeeded { warnings } => {
                    ("ok".to_string(), format!("{} warnings", warnings))
                }
                JobStatus::Failed { kind, error } => (kind.clone(), error.clone()),
                JobStatus::TimedOut => ("timeout".to_string(), String::new()),
            };
            table.add_row(vec![
                o.input.display().to_string(),
                status,
                detail,
                format!("{} ms", o.duration_ms),
            ]);
        }
        table
    }
}

/// Run every job with bounded concurrency and a per-job timeout.
pub async fn run_batch(pipeline: Arc<ReconcilePipeline>, jobs: Vec<JobSpec>) -> BatchSummary {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let config = pipeline.config();
    let timeout = Duration::from_secs(config.job_timeout_secs);
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));

    info!(
        run_id = %run_id,
        jobs = jobs.len(),
        concurrency = config.max_concurrent_jobs,
        timeout_secs = config.job_timeout_secs,
        "Starting batch"
    );

    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        let semaphore = semaphore.clone();
        let pipeline = pipeline.clone();
        let handle = tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await.ok();
            run_one(pipeline, job, timeout, permit).await
        });
        handles.push(handle);
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => warn!(error = %e, "Batch task panicked"),
        }
    }

    let summary = BatchSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        outcomes,
    };
    info!(
        run_id = %run_id,
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        "Batch complete"
    );
    summary
}

/// The permit moves into the blocking job and is released only when the
/// pipeline has returned.
async fn run_one(
    pipeline: Arc<ReconcilePipeline>,
    job: JobSpec,
    timeout: Duration,
    permit: Option<OwnedSemaphorePermit>,
) -> JobOutcome {
    let start = Instant::now();
    let input = job.input.clone();
    let output = job.output.clone();
    let cancel = CancellationToken::new();

    let worker = pipeline.clone();
    let token = cancel.clone();
    let mut task = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        worker.run_with_cancel(&job, &token)
    });

    let status = match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(report))) => JobStatus::Succeeded {
            warnings: report.warnings.len(),
        },
        Ok(Ok(Err(e))) => failed(&e),
        Ok(Err(join)) => panicked(&join),
        Err(_) => {
            let e = PipelineError::Timeout(timeout.as_secs());
            warn!(input = %input.display(), error = %e, "Job timed out, cancelling");
            cancel.cancel();
            // A run that finished before it saw the cancellation still
            // counts as timed out, so its outputs go too.
            if let Ok(Ok(report)) = task.await {
                let mut written = vec![report.output];
                written.extend(report.confidence_output);
                for w in cleanup(pipeline.backend(), &written).warnings() {
                    warn!(input = %input.display(), "{}", w);
                }
            }
            JobStatus::TimedOut
        }
    };

    JobOutcome {
        input,
        output,
        status,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

fn panicked(join: &tokio::task::JoinError) -> JobStatus {
    JobStatus::Failed {
        kind: "panic".to_string(),
        error: join.to_string(),
    }
}

fn failed(e: &PipelineError) -> JobStatus {
    JobStatus::Failed {
        kind: e.kind().to_string(),
        error: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_yaml() {
        let yaml = r#"
jobs:
  - input: a.tif
    output: out/a.tif
    system: esri
directories:
  - input_dir: tiles
    output_dir: out/tiles
    align_landfire: true
"#;
        let manifest: BatchManifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(manifest.jobs.len(), 1);
        assert_eq!(manifest.jobs[0].options.system.as_deref(), Some("esri"));
        assert!(!manifest.directories[0].recursive);
        assert!(manifest.directories[0].options.align_landfire);
    }

    #[test]
    fn test_expand_directory() {
        let dir = tempfile::tempdir().unwrap();
        let input_dir = dir.path().join("in");
        std::fs::create_dir_all(input_dir.join("nested")).unwrap();
        for name in ["b.tif", "a.TIFF", "notes.txt", "nested/c.tif"] {
            std::fs::write(input_dir.join(name), b"").unwrap();
        }

        let mut manifest = BatchManifest {
            jobs: vec![JobSpec::new("first.tif", "first_out.tif")],
            directories: vec![DirectoryJob {
                input_dir: input_dir.clone(),
                output_dir: dir.path().join("out"),
                recursive: false,
                options: JobOptions::default(),
            }],
        };

        let jobs = manifest.expand().unwrap();
        let inputs: Vec<_> = jobs.iter().map(|j| j.input.clone()).collect();
        assert_eq!(
            inputs,
            vec![
                PathBuf::from("first.tif"),
                input_dir.join("a.TIFF"),
                input_dir.join("b.tif"),
            ]
        );
        assert_eq!(jobs[2].output, dir.path().join("out").join("b.tif"));

        manifest.directories[0].recursive = true;
        let jobs = manifest.expand().unwrap();
        assert_eq!(jobs.len(), 4);
        assert!(jobs
            .iter()
            .any(|j| j.output == dir.path().join("out").join("nested").join("c.tif")));
    }

    #[test]
    fn test_summary_counts() {
        let outcome = |status| JobOutcome {
            input: PathBuf::from("x.tif"),
            output: PathBuf::from("y.tif"),
            status,
            duration_ms: 5,
        };
        let summary = BatchSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcomes: vec![
                outcome(JobStatus::Succeeded { warnings: 0 }),
                outcome(JobStatus::TimedOut),
                outcome(JobStatus::Failed {
                    kind: "needs_review".to_string(),
                    error: "not auto-mappable".to_string(),
                }),
            ],
        };
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 2);
        let rendered = summary.render_table().to_string();
        assert!(rendered.contains("needs_review"));
        assert!(rendered.contains("timeout"));
    }
}
