//! Helmsman - Mission Plan Engine
//!
//! Onboard plan engine for unmanned marine vehicles: consumes plan
//! control requests and vehicle telemetry from the bus, drives the
//! vehicle through calibration and maneuver execution, and publishes
//! progress and status.
//!
//! # Usage
//!
//! ```bash
//! # Run against a simulation harness over stdio (JSON message per line)
//! vehicle_sim | helmsman
//!
//! # Explicit config file and database directory
//! helmsman --config ./helmsman.toml --data-dir /var/lib/helmsman/plans
//! ```
//!
//! # Environment Variables
//!
//! - `HELMSMAN_CONFIG`: Path to the engine TOML configuration
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use helmsman::bus::{StdinSource, StdoutBus};
use helmsman::config::EngineConfig;
use helmsman::engine::run::EngineLoop;
use helmsman::engine::PlanEngine;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "helmsman")]
#[command(about = "Helmsman mission plan engine")]
#[command(version)]
struct CliArgs {
    /// Path to the engine configuration TOML file.
    /// Overrides the HELMSMAN_CONFIG environment variable.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the plan database directory.
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::load(),
    };
    if let Some(dir) = args.data_dir {
        config.db.data_dir = dir;
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Helmsman - Mission Plan Engine");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(data_dir = %config.db.data_dir.display(), "Plan database directory");

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    // The bus is JSON-per-line stdio: messages in on stdin, publications
    // out on stdout. Logs go to stderr so the streams do not mix.
    let mut source = StdinSource::new();
    let mut bus = StdoutBus::new();

    let engine_loop = EngineLoop::new(PlanEngine::new(config), cancel_token);
    engine_loop.run(&mut source, &mut bus).await;

    info!("Helmsman shutdown complete");
    Ok(())
}
