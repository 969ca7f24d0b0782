//! Command-line runner for the species distribution pipeline.
//!
//! Reads an occurrence table and two prepared layer stacks, runs the
//! configured estimator and writes the full report as JSON.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use sdm_core::io::{read_json, read_occurrences_path, write_json};
use sdm_core::provider::{ClimateScenario, DirectoryProvider, LayerProvider};
use sdm_core::{run_configured, PipelineConfig, RunReport};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sdm-run", about = "Fit a species distribution model and project it onto a future climate")]
struct Args {
    /// Occurrence table (CSV, or tab-separated for .tsv/.txt).
    #[arg(short, long)]
    occurrences: PathBuf,

    /// Directory holding `<tag>.json` layer stacks from stack_builder.
    #[arg(short, long)]
    layers_dir: PathBuf,

    /// Pipeline configuration JSON. Missing fields take defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "worldclim")]
    dataset: String,

    #[arg(long, default_value = "10m")]
    resolution: String,

    /// General circulation model of the future projection.
    #[arg(long, default_value = "MIROC6")]
    gcm: String,

    #[arg(long, default_value = "ssp585")]
    pathway: String,

    #[arg(long, default_value = "2061-2080")]
    period: String,

    /// Override the configured seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Draw folds and background from OS entropy.
    #[arg(long, conflicts_with = "seed")]
    unseeded: bool,

    /// Report destination.
    #[arg(long, default_value = "output/report.json")]
    output: PathBuf,

    /// Log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Multi-line log output.
    #[arg(long)]
    pretty: bool,
}

/// One-screen digest printed after the run.
#[derive(Serialize)]
struct Digest<'a> {
    records: usize,
    training: usize,
    test: usize,
    test_skipped: usize,
    auc: f64,
    mean_cv_auc: Option<f64>,
    max_tss: f64,
    cells_gained: usize,
    cells_lost: usize,
    report: &'a str,
}

// Logs go to stderr; stdout carries only the digest.
fn init_logging(level: &str, pretty: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if pretty {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => read_json::<PipelineConfig>(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if args.unseeded {
        config.seed = None;
    }
    config.validate().context("invalid pipeline configuration")?;
    Ok(config)
}

fn digest<'a>(report: &RunReport, output: &'a str) -> Digest<'a> {
    Digest {
        records: report.counts.in_study_area,
        training: report.counts.training,
        test: report.counts.test,
        test_skipped: report.evaluation.skipped_presence,
        auc: report.evaluation.auc,
        mean_cv_auc: report.cross_validation.as_ref().map(|cv| cv.mean_auc),
        max_tss: report.evaluation.max_tss,
        cells_gained: report.range_change.gained,
        cells_lost: report.range_change.lost,
        report: output,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.pretty);

    let config = load_config(&args)?;

    let raw = read_occurrences_path(&args.occurrences)
        .with_context(|| format!("reading occurrences {}", args.occurrences.display()))?;
    if raw.is_empty() {
        bail!("{} contains no occurrence rows", args.occurrences.display());
    }
    info!(rows = raw.len(), path = %args.occurrences.display(), "loaded occurrences");

    let provider = DirectoryProvider::new(&args.layers_dir);
    let baseline = ClimateScenario::baseline(&args.dataset, &args.resolution);
    let projected = ClimateScenario::future(&args.dataset, &args.resolution, &args.gcm, &args.pathway, &args.period);
    let current = provider
        .fetch(&baseline)
        .with_context(|| format!("loading {baseline} from {}", provider.path_for(&baseline).display()))?;
    let future = provider
        .fetch(&projected)
        .with_context(|| format!("loading {projected} from {}", provider.path_for(&projected).display()))?;

    let report = run_configured(config, &raw, &current, &future).context("pipeline run failed")?;

    write_json(&args.output, &report).with_context(|| format!("writing {}", args.output.display()))?;
    info!(path = %args.output.display(), "wrote report");

    let output = args.output.display().to_string();
    println!("{}", serde_json::to_string_pretty(&digest(&report, &output))?);
    Ok(())
}
