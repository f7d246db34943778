//! Edge Modbus poller
//!
//! Usage: `edge_modbus <config.json|config.yaml>`
//!
//! Polls every configured slave, runs the configured writes once and prints
//! each published message to stdout as one JSON line until Ctrl-C.

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

use edge_modbus::{init_logging, spawn_publisher, LogLevel, ModuleConfig, SessionManager};

#[tokio::main]
async fn main() -> Result<()> {
    let level = std::env::var("EDGE_MODBUS_LOG")
        .ok()
        .map(|s| s.parse::<LogLevel>())
        .transpose()?
        .unwrap_or_default();
    init_logging(level)?;

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: edge_modbus <config-file>");
    };

    let config = ModuleConfig::from_file(&path)
        .with_context(|| format!("loading configuration from {}", path))?;
    info!("{}", edge_modbus::info());
    info!(
        "Loaded {} slave(s), publish interval {}ms",
        config.slave_configs.len(),
        config.publish_interval
    );

    let mut manager = SessionManager::from_config(&config)?;
    if manager.start_all().await == 0 && !config.slave_configs.is_empty() {
        bail!("no slave could be started");
    }
    manager.run_configured_writes().await;

    let (stop_tx, stop_rx) = watch::channel(false);
    let publisher = spawn_publisher(
        manager.outputs(),
        config.publish_interval(),
        stop_rx,
        |message| match serde_json::to_string(&message) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to serialise message: {}", e),
        },
    );

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutting down");

    manager.shutdown_all().await;
    stop_tx.send_replace(true);
    publisher.await.context("publisher task")?;
    manager.release_all().await;

    Ok(())
}
