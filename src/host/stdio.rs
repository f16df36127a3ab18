//! Stdin/stdout JSON bridge for the host command channel.
//!
//! Reads newline-delimited JSON `CommandEnvelope` messages from stdin,
//! routes them through [`HostCommandRouter`], and writes `ResponseEnvelope`
//! and `EventEnvelope` messages as newline-delimited JSON to stdout.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use crate::error::{PaperError, Result};
use crate::host::contract::{
    CommandEnvelope, EVENT_CYCLE_FINISHED, EventEnvelope, ResponseEnvelope,
};
use crate::host::handler::HostCommandRouter;
use crate::refresh::RefreshCycle;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

/// Run the bridge on the process's stdin and stdout.
///
/// # Errors
///
/// Returns an error if stdin cannot be read or stdout cannot be written.
pub async fn run_stdio_bridge(
    router: HostCommandRouter,
    events: broadcast::Receiver<RefreshCycle>,
    shutdown: CancellationToken,
) -> Result<()> {
    run_bridge(
        tokio::io::stdin(),
        tokio::io::stdout(),
        router,
        events,
        shutdown,
    )
    .await
}

/// Run the JSON bridge until the input closes or `shutdown` fires
/// (`runtime.stop` cancels it).
///
/// Every command is routed on its own task, so a slow `refresh.now` does not
/// hold up later commands: a second `refresh.now` answers `skipped:busy`
/// right away. Responses may therefore arrive out of order; hosts match
/// them by `request_id`. Finished cycles are forwarded as `cycle.finished`
/// events. Pending responses are flushed before returning.
///
/// # Errors
///
/// Returns an error if the input cannot be read or the output cannot be
/// written.
pub async fn run_bridge<R, W>(
    input: R,
    output: W,
    router: HostCommandRouter,
    mut events: broadcast::Receiver<RefreshCycle>,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer: SharedWriter<W> = Arc::new(Mutex::new(BufWriter::new(output)));

    let event_writer = Arc::clone(&writer);
    let event_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(cycle) => {
                    let payload = match serde_json::to_value(&cycle) {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to serialize cycle; skipping event");
                            continue;
                        }
                    };
                    let envelope = EventEnvelope::new(EVENT_CYCLE_FINISHED, payload);
                    if let Err(e) = write_json(&event_writer, &envelope).await {
                        tracing::warn!(
                            error = %e,
                            "failed to write event envelope; stopping event forwarder"
                        );
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut in_flight = JoinSet::new();
    let result = read_commands(input, &writer, &router, &shutdown, &mut in_flight).await;

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "host command task failed");
        }
    }
    event_handle.abort();
    let _ = event_handle.await;
    result
}

async fn read_commands<R, W>(
    input: R,
    writer: &SharedWriter<W>,
    router: &HostCommandRouter,
    shutdown: &CancellationToken,
    in_flight: &mut JoinSet<()>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(input);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("shutdown requested; stopping stdio bridge");
                break;
            }
            read = reader.read_line(&mut line) => read
                .map_err(|e| PaperError::Channel(format!("failed to read from stdin: {e}")))?,
        };

        if bytes_read == 0 {
            tracing::info!("stdin closed (EOF); shutting down stdio bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    raw_line = %trimmed,
                    "failed to parse command envelope from stdin"
                );
                let response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                write_json(writer, &response).await?;
                continue;
            }
        };

        reap_finished(in_flight);
        let router = router.clone();
        let writer = Arc::clone(writer);
        in_flight.spawn(async move {
            let request_id = envelope.request_id.clone();
            let response = match router.route(&envelope).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, command = envelope.command.as_str(), "host command failed");
                    ResponseEnvelope::error(request_id, e.to_string())
                }
            };
            if let Err(e) = write_json(&writer, &response).await {
                tracing::warn!(error = %e, "failed to write response envelope");
            }
        });
    }

    Ok(())
}

/// Drop command tasks that already finished. Returns how many were reaped.
fn reap_finished(in_flight: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(joined) = in_flight.try_join_next() {
        if let Err(e) = joined {
            tracing::error!(error = %e, "host command task failed");
        }
        reaped += 1;
    }
    reaped
}

/// Write one JSON line and flush.
async fn write_json<W, T>(writer: &SharedWriter<W>, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let json = serde_json::to_string(value)
        .map_err(|e| PaperError::Channel(format!("failed to serialize envelope: {e}")))?;
    let mut w = writer.lock().await;
    w.write_all(json.as_bytes())
        .await
        .map_err(|e| PaperError::Channel(format!("failed to write to stdout: {e}")))?;
    w.write_all(b"\n").await.map_err(|e| {
        PaperError::Channel(format!("failed to write newline to stdout: {e}"))
    })?;
    w.flush()
        .await
        .map_err(|e| PaperError::Channel(format!("failed to flush stdout: {e}")))?;
    Ok(())
}
