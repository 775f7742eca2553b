//! Replays a recorded host trace through the telemetry engine and prints
//! the resulting metrics as JSON.

mod replay;
mod trace;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tick::TickConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::replay::ReplayOptions;
use crate::trace::Trace;

#[derive(Parser)]
#[command(name = "tick-replay")]
#[command(about = "Replay a host trace through the telemetry engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the trace file (JSON)
    trace: PathBuf,

    /// Engine configuration file, overriding the trace's own
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Pretty-print the summary
    #[arg(long)]
    pretty: bool,

    /// Aggregate blocking time on a background worker
    #[arg(long)]
    offload_tbt: bool,

    /// Enable frame-drop detection from the first frame
    #[arg(long)]
    detect_drops: bool,
}

fn main() -> Result<()> {
    // Logs go to stderr so the summary on stdout stays parseable
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let raw = fs::read_to_string(&cli.trace)
        .with_context(|| format!("Failed to read trace {}", cli.trace.display()))?;
    let trace: Trace = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse trace {}", cli.trace.display()))?;

    let config = match &cli.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            Some(TickConfig::from_json_str(&json).with_context(|| format!("Invalid config {}", path.display()))?)
        }
        None => None,
    };

    tracing::info!(target: "tick::replay", trace = %cli.trace.display(), steps = trace.steps.len(), "Replaying trace");

    let options = ReplayOptions {
        config,
        offload_tbt: cli.offload_tbt,
        detect_drops: cli.detect_drops,
    };
    let summary = replay::run(&trace, &options)?;

    let output = if cli.pretty {
        serde_json::to_string_pretty(&summary)?
    } else {
        serde_json::to_string(&summary)?
    };
    println!("{}", output);
    Ok(())
}
