//! BXD exporter command line entry point
//!
//! Reads a captured assembly (RON fixture), builds the joint tree and writes
//! the skeleton plus one mesh per group.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use bxd_core::pipeline::{ExportFailure, build_tree};
use bxd_core::{AcceptTree, AssemblyFixture, ExportConfig, ExportOutcome, export_robot};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "bxd-export")]
#[command(about = "Export a CAD assembly as a BXD robot skeleton and meshes")]
#[command(version)]
struct Args {
    /// Assembly fixture (RON) holding occurrences, analysis and groups
    #[arg(required_unless_present = "write_config")]
    assembly: Option<PathBuf>,

    /// Export configuration file
    #[arg(short, long, default_value = "bxd-export.ron")]
    config: PathBuf,

    /// Output directory (overrides the config file)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Vertex count above which a group is reported (overrides the config file)
    #[arg(long)]
    vertex_warning: Option<usize>,

    /// Build and print the joint tree without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Save the effective configuration to the config path and exit
    #[arg(long)]
    write_config: bool,
}

/// Describe what went wrong, separating write failures from rejected input
fn failure_summary(failures: &[ExportFailure]) -> Option<String> {
    if failures.is_empty() {
        return None;
    }
    let (unwritten, rejected): (Vec<_>, Vec<_>) = failures
        .iter()
        .partition(|failure| failure.kind().is_recoverable());

    let mut parts = Vec::new();
    if !unwritten.is_empty() {
        parts.push(format!("{} file(s) could not be written", unwritten.len()));
    }
    if !rejected.is_empty() {
        parts.push(format!("{} group(s) had invalid mesh data", rejected.len()));
    }
    Some(parts.join(", "))
}

fn main() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bxd_core=info,bxd_exporter=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("bxd-export v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ExportConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if let Some(threshold) = args.vertex_warning {
        config.vertex_warning_threshold = threshold;
    }

    if args.write_config {
        config
            .save(&args.config)
            .with_context(|| format!("saving config {}", args.config.display()))?;
        println!("Config written to {}", args.config.display());
        return Ok(());
    }

    let Some(assembly) = args.assembly else {
        bail!("no assembly given");
    };
    let fixture = AssemblyFixture::load(&assembly)
        .with_context(|| format!("loading assembly {}", assembly.display()))?;
    let ctx = fixture.context();

    if args.dry_run {
        let prepared = build_tree(&fixture, &ctx, &fixture.groups, &config)?;
        println!("{}", prepared.tree);
        for orphan in &prepared.clean.orphans {
            println!("dropped {} '{}' (no connections)", orphan.id, orphan.name);
        }
        return Ok(());
    }

    let outcome = export_robot(&fixture, &ctx, &fixture.groups, &mut AcceptTree, &config)
        .inspect_err(|e| tracing::error!(kind = ?e.kind(), "Export aborted: {}", e))?;
    let report = match outcome {
        ExportOutcome::Completed(report) => report,
        ExportOutcome::Cancelled => {
            println!("Export cancelled");
            return Ok(());
        }
    };

    if let Some(skeleton) = &report.skeleton {
        println!("Skeleton: {}", skeleton.display());
    }
    println!("Meshes written: {}", report.meshes.len());
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    for failure in &report.failures {
        eprintln!("error: {failure}");
    }

    if let Some(summary) = failure_summary(&report.failures) {
        bail!(summary);
    }
    Ok(())
}
