//! Newline-delimited JSON-RPC client over a child's stdio.
//!
//! Outbound calls get bridge-assigned numeric ids; a single reader task
//! routes each response to the waiting caller by id, so completions may
//! arrive in any order.

use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::backend::launcher::{BoxedReader, BoxedWriter, Transport};
use crate::error::BridgeError;
use crate::rpc::{Request, RequestId, Response, RpcError};

/// How long the child gets to exit after its stdin closes.
const STOP_GRACE: Duration = Duration::from_secs(2);

type PendingMap = DashMap<u64, oneshot::Sender<Result<Value, BridgeError>>>;
type SharedWriter = Arc<Mutex<Option<BoxedWriter>>>;

pub struct RpcClient {
    writer: SharedWriter,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    process: Mutex<Option<Child>>,
    reader_task: JoinHandle<()>,
}

impl RpcClient {
    /// Take ownership of a transport and start the reader task.
    ///
    /// Notifications from the child are published on `notifications`.
    /// `on_close` runs once when the child's output ends.
    pub fn start<F>(
        transport: Transport,
        notifications: broadcast::Sender<Value>,
        on_close: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let writer: SharedWriter = Arc::new(Mutex::new(Some(transport.writer)));
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let reader_task = tokio::spawn(read_loop(
            transport.reader,
            writer.clone(),
            pending.clone(),
            closed.clone(),
            notifications,
            on_close,
        ));

        Self {
            writer,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            process: Mutex::new(transport.process),
            reader_task,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of calls awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Send a call and wait for its result.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::backend("backend connection closed"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        // The reader marks the client closed before draining, so re-checking
        // here keeps a late insert from waiting out the full timeout.
        if self.is_closed() {
            self.pending.remove(&id);
            return Err(BridgeError::backend("backend connection closed"));
        }

        let request = Request::new(RequestId::Number(id as i64), method, params);
        if let Err(e) = write_message(&self.writer, &request).await {
            self.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::backend(
                "backend connection closed before responding",
            )),
            Err(_) => {
                self.pending.remove(&id);
                Err(BridgeError::UpstreamTimeout {
                    method: method.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Send a notification; nothing is awaited besides the write.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::backend("backend connection closed"));
        }
        write_message(&self.writer, &Request::notification(method, params)).await
    }

    /// Close stdin, give the child a moment to exit, then kill it.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        drop(self.writer.lock().await.take());

        if let Some(mut child) = self.process.lock().await.take() {
            match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::info!(?status, "Backend process exited"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait on backend process"),
                Err(_) => {
                    tracing::warn!("Backend process did not exit after stdin close, killing");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "Failed to kill backend process");
                    }
                }
            }
        }

        self.reader_task.abort();
        fail_pending(&self.pending, "backend connection closed");
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn write_message<T: serde::Serialize>(
    writer: &SharedWriter,
    message: &T,
) -> Result<(), BridgeError> {
    let mut line = serde_json::to_vec(message)
        .map_err(|e| BridgeError::backend(format!("failed to encode message: {}", e)))?;
    line.push(b'\n');

    let mut guard = writer.lock().await;
    let stdin = guard
        .as_mut()
        .ok_or_else(|| BridgeError::backend("backend connection closed"))?;
    stdin
        .write_all(&line)
        .await
        .map_err(|e| BridgeError::backend(format!("write to backend failed: {}", e)))?;
    stdin
        .flush()
        .await
        .map_err(|e| BridgeError::backend(format!("flush to backend failed: {}", e)))
}

fn fail_pending(pending: &PendingMap, reason: &str) {
    let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.send(Err(BridgeError::backend(reason)));
        }
    }
}

async fn read_loop<F>(
    reader: BoxedReader,
    writer: SharedWriter,
    pending: Arc<PendingMap>,
    closed: Arc<AtomicBool>,
    notifications: broadcast::Sender<Value>,
    on_close: F,
) where
    F: FnOnce() + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => handle_line(&line, &writer, &pending, &notifications),
            Ok(None) => {
                tracing::warn!("Backend output closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed reading backend output");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    fail_pending(&pending, "backend connection closed");
    on_close();
}

fn handle_line(
    line: &str,
    writer: &SharedWriter,
    pending: &PendingMap,
    notifications: &broadcast::Sender<Value>,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let message: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => {
            tracing::debug!(line, "Ignoring non-JSON backend output");
            return;
        }
    };

    if let Some(method) = message.get("method").and_then(Value::as_str) {
        match message.get("id") {
            Some(id) => answer_child_request(method, id.clone(), writer),
            None => {
                tracing::debug!(method, "Backend notification");
                let _ = notifications.send(message);
            }
        }
        return;
    }

    let Some(id) = message.get("id").and_then(Value::as_u64) else {
        tracing::warn!(payload = %message, "Backend response without a usable id");
        return;
    };

    let Some((_, tx)) = pending.remove(&id) else {
        tracing::debug!(rpc_id = id, "Response for a call nobody is waiting on");
        return;
    };

    let outcome = match message.get("error") {
        Some(error) => match serde_json::from_value::<RpcError>(error.clone()) {
            Ok(err) => Err(BridgeError::Domain(err)),
            Err(_) => Err(BridgeError::Domain(RpcError {
                code: RpcError::INVALID_REQUEST,
                message: "backend returned a malformed error".into(),
                data: Some(error.clone()),
            })),
        },
        None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
    };
    let _ = tx.send(outcome);
}

/// The bridge is a client towards the child; the only server-side method it
/// honours is `ping`.
fn answer_child_request(method: &str, id: Value, writer: &SharedWriter) {
    let Ok(id) = serde_json::from_value::<RequestId>(id) else {
        tracing::warn!(method, "Backend request with an unusable id");
        return;
    };
    let response = if method == "ping" {
        Response::success(id, json!({}))
    } else {
        tracing::debug!(method, "Rejecting backend-initiated request");
        Response::failure(Some(id), RpcError::method_not_found(method))
    };

    let writer = writer.clone();
    tokio::spawn(async move {
        if let Err(e) = write_message(&writer, &response).await {
            tracing::debug!(error = %e, "Failed to answer backend request");
        }
    });
}
