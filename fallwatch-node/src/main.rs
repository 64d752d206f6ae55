//! FallWatch relay node
//!
//! Wires the sensor server, the monitor link and the alarm outputs together
//! and hands them to the network lifecycle.

use anyhow::{Context, Result};
use fallwatch_node::config::NodeConfig;
use fallwatch_node::outputs::LogOutputDriver;
use fallwatch_node::{network, Alarm, AlarmState, Indicators, LinkHealth, MonitorLink, NetworkLifecycle};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("FallWatch relay node v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::load()
        .await
        .context("Failed to load node configuration")?;

    let health = LinkHealth::new();

    let indicators = Indicators::new(
        Arc::new(LogOutputDriver::new(config.outputs.clone())),
        config.outputs.clone(),
    );
    indicators.show(false);
    if config.outputs.lamp_test {
        indicators.lamp_test().await;
    }

    let monitor = MonitorLink::spawn(config.monitor.clone(), health.clone());
    let alarm = Alarm::new(AlarmState::new(indicators), monitor.clone());

    if let Some(every) = config.health.report_interval() {
        health.spawn_reporter(every);
    }

    let (events, event_rx) = mpsc::channel(8);
    network::spawn_probe(config.network.clone(), events);

    info!(
        "Relaying sensor port {} to monitor {}",
        config.sensor.listen_port,
        config.monitor.endpoint()
    );

    NetworkLifecycle::new(config.sensor.clone(), alarm, monitor, health)
        .run(event_rx, shutdown_signal())
        .await;

    info!("FallWatch relay node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
