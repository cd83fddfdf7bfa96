//! # Drone Bridge
//!
//! Control and telemetry bridge between a dashboard database and a
//! serial-attached drone.
//!
//! The daemon reconciles desired control state from the `drone_controls`
//! table with the device over a line-oriented serial protocol, ingests
//! sensor telemetry, tracks per-run session statistics, and aggregates
//! daily rollups. Configuration is environment-sourced (`SERIAL_PORT`,
//! `BAUD_RATE`, `DB_PATH`, `LOG_DIR`, optional `BRIDGE_CONFIG` TOML
//! file); there are no CLI flags.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use drone_bridge::bridge::Bridge;
use drone_bridge::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Console logging always; file logging mirrors it when enabled
    let mut appender_guard = None;
    let file_layer = if config.log.file_enabled {
        let appender = tracing_appender::rolling::daily(&config.log.dir, "drone-bridge.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        appender_guard = Some(guard);
        Some(fmt::layer().with_ansi(false).with_writer(writer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with(fmt::layer())
        .with(file_layer)
        .init();

    info!("Drone Bridge v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "device {} @ {} baud, database {}",
        config.serial.port, config.serial.baud_rate, config.storage.path
    );

    let mut bridge = Bridge::new(&config)?;
    bridge.run().await?;

    // Keep the non-blocking appender alive until the loop has exited
    drop(appender_guard);

    info!("Drone Bridge stopped");
    Ok(())
}
