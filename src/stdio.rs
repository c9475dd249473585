//! Direct stdio passthrough for local use.
//!
//! Newline-delimited JSON-RPC is read from the bridge's own stdin, handled
//! by a single session, and answered on stdout. Backend notifications are
//! written to stdout as they arrive.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::lifecycle::ShutdownSignal;
use crate::rpc::{parse_payload, Incoming, Payload, Response, RpcError};
use crate::session::{Session, SessionRegistry};

pub const STDIO_SESSION_ID: &str = "stdio";

type SharedOut<W> = Arc<Mutex<W>>;

/// Serve the process's own stdin/stdout until EOF or shutdown.
pub async fn run_stdio(
    registry: Arc<SessionRegistry>,
    shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    serve(registry, tokio::io::stdin(), tokio::io::stdout(), shutdown).await
}

/// Serve any line-oriented reader/writer pair.
pub async fn serve<R, W>(
    registry: Arc<SessionRegistry>,
    input: R,
    output: W,
    mut shutdown: ShutdownSignal,
) -> Result<(), std::io::Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let session = registry
        .get_or_create(STDIO_SESSION_ID)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let out: SharedOut<W> = Arc::new(Mutex::new(output));

    let (_, mut events) = session
        .open_stream()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let relay_out = out.clone();
    let relay = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(e) = write_line(&relay_out, &event).await {
                tracing::warn!(error = %e, "Failed to relay notification to stdout");
            }
        }
    });

    tracing::info!("Stdio transport ready");
    let mut lines = BufReader::new(input).lines();
    let mut in_flight = JoinSet::new();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.recv() => {
                tracing::info!("Shutdown signal received, stopping stdio transport");
                break;
            }
        };
        let Some(line) = line else {
            tracing::info!("Stdin closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let session = session.clone();
        let out = out.clone();
        in_flight.spawn(async move {
            if let Some(reply) = handle_line(&session, line.as_bytes()).await {
                if let Err(e) = write_line(&out, &reply).await {
                    tracing::warn!(error = %e, "Failed to write response to stdout");
                }
            }
        });
    }

    while in_flight.join_next().await.is_some() {}
    registry.remove(STDIO_SESSION_ID);
    let _ = relay.await;
    Ok(())
}

async fn handle_line(session: &Session, line: &[u8]) -> Option<serde_json::Value> {
    let payload = match parse_payload(line) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting stdin message");
            let code = if serde_json::from_slice::<serde_json::Value>(line).is_ok() {
                RpcError::INVALID_REQUEST
            } else {
                RpcError::PARSE_ERROR
            };
            return Some(serde_json::json!(Response::failure(
                None,
                RpcError::new(code, e.to_string())
            )));
        }
    };

    let is_batch = payload.is_batch();
    let items = match payload {
        Payload::Single(Incoming::Call(req)) => {
            return Some(serde_json::json!(session.endpoint().handle_call(req).await));
        }
        other => other.into_items(),
    };
    let responses = session.endpoint().dispatch(items).await;
    match (is_batch, responses.is_empty()) {
        (_, true) => None,
        (true, false) => Some(serde_json::json!(responses)),
        (false, false) => responses.into_iter().next().map(|r| serde_json::json!(r)),
    }
}

async fn write_line<W>(out: &SharedOut<W>, value: &serde_json::Value) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    let mut out = out.lock().await;
    out.write_all(&bytes).await?;
    out.flush().await
}
