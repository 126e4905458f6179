//! Stdin/stdout JSON bridge for the host command channel.
//!
//! Reads newline-delimited JSON `CommandEnvelope` messages from stdin,
//! dispatches them through the command router, and writes `ResponseEnvelope`
//! and `EventEnvelope` messages as newline-delimited JSON to stdout.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::host::channel::{HostCommandClient, command_channel};
use crate::host::contract::{CommandEnvelope, CommandName, ResponseEnvelope};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Default request channel capacity for the stdio bridge.
const REQUEST_CAPACITY: usize = 64;

/// Default event broadcast channel capacity for the stdio bridge.
const EVENT_CAPACITY: usize = 128;

type SharedWriter<W> = Arc<Mutex<W>>;

/// Run the bridge on the process's stdin/stdout until stdin closes or a
/// `host.shutdown` command is received.
pub async fn run_stdio_bridge(engine: Arc<SyncEngine>) -> Result<()> {
    run_bridge(
        engine,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

/// Run the bridge over arbitrary line-oriented I/O.
///
/// Three kinds of work run concurrently:
///
/// 1. **Reader** -- reads commands and dispatches each one on its own task,
///    so a slow mutation does not delay later commands.
/// 2. **Event forwarder** -- writes broadcast `EventEnvelope`s as JSON lines.
/// 3. **Server** -- the command-router loop.
///
/// The engine's poll timer runs for the lifetime of the bridge. On exit,
/// outstanding commands are answered before the function returns.
pub async fn run_bridge<R, W>(engine: Arc<SyncEngine>, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (client, server) = command_channel(REQUEST_CAPACITY, EVENT_CAPACITY, Arc::clone(&engine));
    let writer: SharedWriter<W> = Arc::new(Mutex::new(writer));

    let server_handle = tokio::spawn(server.run());

    let event_writer = Arc::clone(&writer);
    let mut event_rx = client.subscribe_events();
    let event_handle = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event_envelope) => match serde_json::to_string(&event_envelope) {
                    Ok(json) => {
                        if let Err(e) = write_line(&event_writer, &json).await {
                            tracing::warn!(
                                error = %e,
                                "failed to write event envelope; stopping event forwarder"
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize event envelope; skipping");
                    }
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    tracing::info!("event broadcast channel closed; stopping event forwarder");
                    break;
                }
            }
        }
    });

    engine.start();
    let reader_result = run_reader(client, reader, Arc::clone(&writer)).await;
    engine.shutdown().await;

    event_handle.abort();
    let _ = event_handle.await;
    let _ = server_handle.await;

    reader_result
}

/// Read commands line-by-line and answer each one.
async fn run_reader<R, W>(
    client: HostCommandClient,
    mut reader: R,
    writer: SharedWriter<W>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut in_flight = JoinSet::new();
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| SyncError::Channel(format!("failed to read from stdin: {e}")))?;

        if bytes_read == 0 {
            tracing::info!("stdin closed (EOF); shutting down stdio bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse command envelope");
                let response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                write_response(&writer, &response).await?;
                continue;
            }
        };

        if envelope.command == CommandName::HostShutdown {
            let response = dispatch(&client, envelope).await;
            while in_flight.join_next().await.is_some() {}
            write_response(&writer, &response).await?;
            tracing::info!("host.shutdown received; shutting down stdio bridge");
            break;
        }

        let client = client.clone();
        let writer = Arc::clone(&writer);
        in_flight.spawn(async move {
            let response = dispatch(&client, envelope).await;
            if let Err(e) = write_response(&writer, &response).await {
                tracing::warn!(error = %e, "failed to write response");
            }
        });
    }

    while in_flight.join_next().await.is_some() {}
    Ok(())
}

async fn dispatch(client: &HostCommandClient, envelope: CommandEnvelope) -> ResponseEnvelope {
    let request_id = envelope.request_id.clone();
    let command = envelope.command;
    match client.send(envelope).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(command = command.as_str(), error = %e, "host command failed");
            ResponseEnvelope::error(request_id, e.to_string())
        }
    }
}

async fn write_response<W>(writer: &SharedWriter<W>, response: &ResponseEnvelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response)?;
    write_line(writer, &json).await
}

/// Write a single JSON line and flush.
async fn write_line<W>(writer: &SharedWriter<W>, json: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut w = writer.lock().await;
    w.write_all(json.as_bytes())
        .await
        .map_err(|e| SyncError::Channel(format!("failed to write to stdout: {e}")))?;
    w.write_all(b"\n")
        .await
        .map_err(|e| SyncError::Channel(format!("failed to write newline to stdout: {e}")))?;
    w.flush()
        .await
        .map_err(|e| SyncError::Channel(format!("failed to flush stdout: {e}")))?;
    Ok(())
}
