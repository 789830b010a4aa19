//! scalingengined — the scaling engine daemon.
//!
//! Single binary that assembles:
//! - Policy, scaling-engine, and scheduler state stores (redb)
//! - Runtime-platform client
//! - Scaling engine
//! - Active-schedule synchronizer loop
//! - Scaling history pruner loop
//! - REST API
//!
//! redb locks each database file exclusively, so `policy_db` and
//! `scheduler_db` cannot be shared with a running policy or scheduler
//! service. Rows in them are only visible to this process.
//!
//! # Usage
//!
//! ```text
//! scalingengined --config /etc/autoscaler/scalingengine.toml
//! ```

mod config;
mod server;

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogFormat, LoggingConfig};

#[derive(Parser)]
#[command(name = "scalingengined", about = "App autoscaler scaling engine daemon")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    init_logging(&config.logging);
    info!(config = ?cli.config, port = config.server.port, "scaling engine starting");

    server::run(config).await
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
