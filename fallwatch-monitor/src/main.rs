//! FallWatch monitoring host
//!
//! Accepts connections from relay nodes, decodes their notifications and
//! prints fall/recovery reports for the operator.

mod config;
mod console;
mod server;
mod tracker;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracker::AlarmTracker;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("invalid config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid listen address: {0}")]
    InvalidAddress(String),
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::load_config()
        .await
        .context("Failed to load monitor configuration")?;

    let listener = server::bind(&config).context("Failed to start monitor server")?;
    info!("Monitor host listening on {}, waiting for relay nodes...", config.listen_addr());

    let tracker = AlarmTracker::new(config.repeat_window(), Instant::now()).shared();
    let (reports, report_rx) = mpsc::unbounded_channel();
    tokio::spawn(console::print_reports(report_rx, config.bell));

    tokio::select! {
        _ = server::serve(listener, tracker, reports) => {}
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for Ctrl-C")?;
            info!("Monitor host shutting down");
        }
    }
    Ok(())
}
