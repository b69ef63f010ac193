use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use dbus_interface::{ViewerService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("depthviewd starting");

    let config = config::Config::from_env();

    // Camera faults at startup are fatal
    let engine = engine::spawn_engine(&config)?;
    let handle = engine.handle();

    let _connection = if config.dbus_enabled {
        let conn = zbus::connection::Builder::session()?
            .name(BUS_NAME)?
            .serve_at(OBJECT_PATH, ViewerService::new(handle.clone()))?
            .build()
            .await?;
        tracing::info!(bus_name = BUS_NAME, "D-Bus interface registered");
        Some(conn)
    } else {
        tracing::info!("D-Bus disabled via DEPTHVIEW_DBUS_ENABLED=0");
        None
    };

    tracing::info!(interval_ms = config.interval.as_millis() as u64, "depthviewd ready");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("depthviewd shutting down");
        }
        _ = handle.closed() => {
            tracing::warn!("engine exited");
        }
    }

    let stats = tokio::task::spawn_blocking(move || engine.shutdown()).await??;
    tracing::info!(cycles = stats.cycles, skipped = stats.skipped, "depthviewd stopped");

    Ok(())
}
