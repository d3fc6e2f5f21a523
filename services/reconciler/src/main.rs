//! Land-cover reconciliation CLI.
//!
//! Converts ESRI / Sentinel / LANDFIRE land-cover GeoTIFFs to FBFM40,
//! optionally reprojected and snapped to the LANDFIRE lattice.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use class_mapping::document::{load_table, to_markdown};
use class_mapping::{ClassificationSystem, DocumentFormat, MappingDocument, MappingPlan, MappingTable};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use projection::CategoricalResampling;
use raster_io::GeoTiffBackend;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reconciler::{run_batch, BatchManifest, JobOptions, JobSpec, ReconcilePipeline, ReconcilerConfig};

#[derive(Parser, Debug)]
#[command(name = "reconciler")]
#[command(about = "Reconcile land-cover rasters to FBFM40 fuel models")]
struct Cli {
    /// YAML configuration file (environment variables override it)
    #[arg(short, long, env = "RECONCILER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile one raster
    Run {
        /// Input land-cover GeoTIFF
        input: PathBuf,

        /// Output FBFM40 GeoTIFF
        output: PathBuf,

        #[command(flatten)]
        job: JobArgs,

        /// Skip nodata gap filling
        #[arg(long)]
        no_fill: bool,

        /// Skip the confidence raster
        #[arg(long)]
        no_confidence: bool,
    },

    /// Detect a raster's classification system and show its mapping plan
    Detect {
        input: PathBuf,

        #[command(flatten)]
        table: TableArgs,
    },

    /// Run the validation checks of a mapping table
    ValidateTable {
        #[command(flatten)]
        table: TableArgs,
    },

    /// Write a mapping table as JSON, YAML or Markdown
    ExportTable {
        #[command(flatten)]
        table: TableArgs,

        #[arg(long, value_enum, default_value_t = ExportFormat::Yaml)]
        format: ExportFormat,

        /// Output file (stdout when absent)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Describe a raster and the backend
    Info {
        input: Option<PathBuf>,

        /// Also compute the data footprint in WGS84
        #[arg(long)]
        bounds: bool,
    },

    /// Run every job of a YAML manifest
    Batch {
        #[arg(short, long)]
        manifest: PathBuf,

        /// Write the batch summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct TableArgs {
    /// Source system (esri, sentinel, landfire, fbfm40); detected when absent
    #[arg(long)]
    system: Option<String>,

    /// JSON or YAML mapping document
    #[arg(long, conflicts_with = "system")]
    mapping_table: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct JobArgs {
    #[command(flatten)]
    table: TableArgs,

    /// Output CRS, e.g. EPSG:5070
    #[arg(long)]
    target_crs: Option<String>,

    /// Output pixel size in target CRS units
    #[arg(long)]
    resolution: Option<f64>,

    /// Snap to the LANDFIRE CONUS lattice
    #[arg(long)]
    align_landfire: bool,

    /// Snap to this raster's lattice
    #[arg(long, conflicts_with = "align_landfire")]
    reference: Option<PathBuf>,

    #[arg(long, default_value = "nearest")]
    resampling: CategoricalResampling,

    /// Proceed when the mapping plan needs review
    #[arg(long)]
    force: bool,

    /// Write a JSON report next to the output
    #[arg(long)]
    report: bool,
}

impl From<JobArgs> for JobOptions {
    fn from(args: JobArgs) -> Self {
        Self {
            system: args.table.system,
            mapping_table: args.table.mapping_table,
            target_crs: args.target_crs,
            resolution: args.resolution,
            align_landfire: args.align_landfire,
            reference: args.reference,
            resampling: args.resampling,
            force: args.force,
            write_report: args.report,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Yaml,
    Markdown,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format)?;

    let mut config = ReconcilerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            input,
            output,
            job,
            no_fill,
            no_confidence,
        } => {
            if no_fill {
                config.processor.fill_gaps = false;
            }
            if no_confidence {
                config.processor.emit_confidence = false;
            }
            let pipeline = build_pipeline(config)?;
            let job = JobSpec::new(input, output).with_options(job.into());
            let report = pipeline.run(&job)?;
            report.write_text(io::stdout().lock())?;
        }
        Command::Detect { input, table } => {
            let pipeline = build_pipeline(config)?;
            let job = JobSpec::new(input, PathBuf::new()).with_options(JobOptions {
                system: table.system,
                mapping_table: table.mapping_table,
                force: true,
                ..Default::default()
            });
            let selection = pipeline.select(&job)?;
            let mut out = io::stdout().lock();
            writeln!(out, "System: {}", selection.system)?;
            writeln!(out, "Table:  {}", selection.table.name())?;
            writeln!(out, "{}", plan_table(&selection.plan))?;
            for w in &selection.warnings {
                writeln!(out, "  - {}", w)?;
            }
            if !selection.plan.auto_mappable {
                warn!(system = %selection.system, "Plan needs manual review");
            }
        }
        Command::ValidateTable { table } => {
            let pipeline = build_pipeline(config)?;
            let table = resolve_table(&pipeline, &table)?;
            let report = table.validate();
            let mut out = io::stdout().lock();
            let mut checks = Table::new();
            checks.load_preset(UTF8_FULL).set_header(vec!["Check", "Result"]);
            for (name, passed) in report.checks() {
                checks.add_row(vec![name, if passed { "pass" } else { "FAIL" }]);
            }
            writeln!(out, "{}", checks)?;
            for w in report.warnings() {
                writeln!(out, "  - {}", w)?;
            }
            if !report.passed {
                bail!("mapping table {} failed validation", table.name());
            }
        }
        Command::ExportTable {
            table,
            format,
            output,
        } => {
            let pipeline = build_pipeline(config)?;
            let table = resolve_table(&pipeline, &table)?;
            let report = table.validate();
            let text = match format {
                ExportFormat::Markdown => to_markdown(&table, Some(&report)),
                ExportFormat::Json => {
                    MappingDocument::from_table(&table, Some(report)).render(DocumentFormat::Json)?
                }
                ExportFormat::Yaml => {
                    MappingDocument::from_table(&table, Some(report)).render(DocumentFormat::Yaml)?
                }
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, text)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!(path = %path.display(), "Exported mapping table");
                }
                None => io::stdout().lock().write_all(text.as_bytes())?,
            }
        }
        Command::Info { input, bounds } => {
            let pipeline = build_pipeline(config)?;
            info_command(&pipeline, input.as_deref(), bounds)?;
        }
        Command::Batch { manifest, summary } => {
            let jobs = BatchManifest::load(&manifest)?.expand()?;
            let pipeline = Arc::new(build_pipeline(config)?);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let result = runtime.block_on(run_batch(pipeline, jobs));
            println!("{}", result.render_table());
            if let Some(path) = summary {
                let json = serde_json::to_string_pretty(&result)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            if result.failed() > 0 {
                bail!("{} of {} jobs failed", result.failed(), result.outcomes.len());
            }
        }
    }

    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

fn build_pipeline(config: ReconcilerConfig) -> Result<ReconcilePipeline> {
    let backend = Arc::new(GeoTiffBackend::new(config.geotiff.clone()));
    Ok(ReconcilePipeline::new(backend, config)?)
}

fn resolve_table(pipeline: &ReconcilePipeline, args: &TableArgs) -> Result<Arc<MappingTable>> {
    match (&args.mapping_table, &args.system) {
        (Some(path), _) => Ok(Arc::new(load_table(path)?)),
        (None, Some(name)) => {
            let system: ClassificationSystem = name.parse()?;
            pipeline
                .engine()
                .registry()
                .table(system)
                .with_context(|| format!("no built-in table for {}", system))
        }
        (None, None) => bail!("pass --system or --mapping-table"),
    }
}

fn plan_table(plan: &MappingPlan) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Source", "FBFM40", "Confidence", "Note"]);
    for (code, mapped) in &plan.mappings {
        table.add_row(vec![
            code.to_string(),
            mapped.target.to_string(),
            format!("{:.2}", mapped.confidence),
            String::new(),
        ]);
    }
    for code in &plan.unmapped {
        let note = plan
            .recommendations
            .get(code)
            .and_then(|r| r.first())
            .map(|r| format!("suggest {} ({})", r.target_code, r.reason))
            .unwrap_or_default();
        table.add_row(vec![code.to_string(), "-".to_string(), "-".to_string(), note]);
    }
    table
}

fn info_command(pipeline: &ReconcilePipeline, input: Option<&Path>, bounds: bool) -> Result<()> {
    let backend = pipeline.backend();
    let mut out = io::stdout().lock();

    let sys = backend.system_info();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Field", "Value"]);
    table.add_row(vec!["Backend".to_string(), format!("{} {}", sys.backend, sys.version)]);
    table.add_row(vec!["Formats".to_string(), sys.formats.join(", ")]);
    table.add_row(vec!["Projection".to_string(), sys.projection_engine]);
    table.add_row(vec!["CPUs".to_string(), sys.cpu_count.to_string()]);
    table.add_row(vec!["Platform".to_string(), format!("{}/{}", sys.os, sys.arch)]);

    if let Some(path) = input {
        let v = backend.validate(path)?;
        table.add_row(vec!["Size".to_string(), format!("{} x {}", v.width, v.height)]);
        table.add_row(vec!["Bands".to_string(), v.band_count.to_string()]);
        table.add_row(vec!["Pixel type".to_string(), v.pixel_type.to_string()]);
        table.add_row(vec![
            "CRS".to_string(),
            v.crs.as_ref().map_or_else(|| "none".to_string(), |c| c.name()),
        ]);
        table.add_row(vec![
            "Nodata".to_string(),
            v.nodata.map_or_else(|| "none".to_string(), |n| n.to_string()),
        ]);
        if bounds {
            let b = backend.bounds(path, pipeline.engine().reprojector())?;
            table.add_row(vec![
                "Footprint".to_string(),
                format!("{:.5}, {:.5}, {:.5}, {:.5}", b.min_x, b.min_y, b.max_x, b.max_y),
            ]);
        }
        writeln!(out, "{}", table)?;
        for w in &v.warnings {
            writeln!(out, "  - {}", w)?;
        }
    } else {
        writeln!(out, "{}", table)?;
    }
    Ok(())
}
