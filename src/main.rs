//! # kbpress CLI
//!
//! Compress a knowledge base from the command line.
//!
//! ```bash
//! kbpress --base-path ./kbs --kb family --dump-path ./out --dump-name family_comp
//! ```
//!
//! Configuration comes from `kbpress.toml` / `kbpress.local.toml` /
//! `KBPRESS_*` environment variables; every mining option can also be
//! overridden by a flag. The run log is written into the dump
//! directory next to the compressed KB and the JSON report.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kbpress::compressor::Compressor;
use kbpress::config::Config;
use kbpress::rule::EvalMetric;

#[derive(Parser, Debug)]
#[command(name = "kbpress", version, about = "Knowledge base compression by Horn rule induction")]
struct Cli {
    /// Configuration file (defaults to kbpress.toml in the working dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory containing the KB directory
    #[arg(long)]
    base_path: Option<PathBuf>,

    /// Name of the KB to compress
    #[arg(long)]
    kb: Option<String>,

    /// Directory receiving the compressed KB
    #[arg(long)]
    dump_path: Option<PathBuf>,

    /// Name of the compressed KB
    #[arg(long)]
    dump_name: Option<String>,

    /// Beam width of the rule search
    #[arg(long)]
    beamwidth: Option<usize>,

    /// Rule ranking metric
    #[arg(long, value_enum)]
    eval_metric: Option<EvalMetric>,

    /// Minimum fraction of head facts a candidate must cover
    #[arg(long)]
    min_fact_coverage: Option<f64>,

    /// Minimum column frequency for promising constants
    #[arg(long)]
    min_constant_coverage: Option<f64>,

    /// Compression ratio at which rule extension stops
    #[arg(long)]
    stop_compression_ratio: Option<f64>,

    /// Mine at most this many relations (0 = all)
    #[arg(long)]
    max_relations: Option<usize>,

    /// Validate the dump by reconstruction
    #[arg(long)]
    validation: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load().context("loading configuration")?,
    };
    apply_overrides(&mut config, &cli);
    config.validate().context("validating configuration")?;

    /* Log into the dump directory, next to the compressed KB */
    let log_dir = config.paths.dump_path.join(&config.paths.dump_name);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating dump directory {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::never(&log_dir, "run.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let compressor = Compressor::new(config);
    let outcome = compressor.run().context("compression run")?;
    let report = &outcome.report;
    println!(
        "{}: {} rules, {} necessary records, {} counterexamples, {} supplementary constants ({:.2}% of {} records kept)",
        report.dump_name,
        report.hypothesis_rules,
        report.necessary_records,
        report.counterexamples,
        report.supplementary_constants,
        report.compression_ratio_pct,
        report.kb_records,
    );
    Ok(())
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(base_path) = &cli.base_path {
        config.paths.base_path.clone_from(base_path);
    }
    if let Some(kb) = &cli.kb {
        config.paths.kb_name.clone_from(kb);
    }
    if let Some(dump_path) = &cli.dump_path {
        config.paths.dump_path.clone_from(dump_path);
    }
    if let Some(dump_name) = &cli.dump_name {
        config.paths.dump_name.clone_from(dump_name);
    }
    if let Some(beamwidth) = cli.beamwidth {
        config.mining.beamwidth = beamwidth;
    }
    if let Some(metric) = cli.eval_metric {
        config.mining.eval_metric = metric;
    }
    if let Some(coverage) = cli.min_fact_coverage {
        config.mining.min_fact_coverage = coverage;
    }
    if let Some(coverage) = cli.min_constant_coverage {
        config.mining.min_constant_coverage = coverage;
    }
    if let Some(ratio) = cli.stop_compression_ratio {
        config.mining.stop_compression_ratio = ratio;
    }
    if let Some(max_relations) = cli.max_relations {
        config.mining.max_relations = max_relations;
    }
    if cli.validation {
        config.mining.validation = true;
    }
}
