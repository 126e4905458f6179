//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! This binary reads `CommandEnvelope` messages as newline-delimited JSON
//! from stdin, dispatches them to the sync engine, and writes
//! `ResponseEnvelope` and `EventEnvelope` messages to stdout.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use station_sync::SyncEngine;
use station_sync::host::stdio::run_stdio_bridge;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise tracing to stderr only (stdout is reserved for the JSON
    // protocol).
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("station_sync=info")),
        )
        .init();

    tracing::info!("station-sync-host starting");

    let engine = SyncEngine::open_default().map_err(|e| {
        tracing::error!(error = %e, "cannot open sync engine");
        anyhow::anyhow!("station-sync-host failed to start: {e}")
    })?;

    run_stdio_bridge(Arc::new(engine)).await.map_err(|e| {
        tracing::error!(error = %e, "station-sync-host exited with error");
        anyhow::anyhow!("station-sync-host failed: {e}")
    })?;

    tracing::info!("station-sync-host shut down cleanly");
    Ok(())
}
