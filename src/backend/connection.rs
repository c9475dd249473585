//! The process-wide child connection.
//!
//! # State Machine
//! ```text
//! Absent ──ensure_connected──▶ Connecting ──handshake ok──▶ Ready
//!                                  │                          │
//!                                  └──spawn/handshake err──▶ Failed ◀──child output closed
//!
//! Failed ──next call──▶ Connecting      (reconnect on demand, never automatic)
//! any ──close──▶ Absent                 (shutdown)
//! ```
//!
//! The `Absent/Failed → Connecting` transition happens under an async mutex,
//! so concurrent callers wait for the one in-progress connect instead of
//! spawning their own child.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex};

use crate::backend::client::RpcClient;
use crate::backend::launcher::{Launcher, ProcessLauncher};
use crate::config::BackendConfig;
use crate::error::BridgeError;
use crate::observability::metrics;

/// MCP protocol revision requested from the child.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Absent,
    Connecting,
    Ready,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Absent => "absent",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Failed => "failed",
        }
    }
}

pub struct BackendConnection {
    launcher: Arc<dyn Launcher>,
    backend_url: String,
    handshake_timeout: Duration,
    call_timeout: Duration,
    /// Holding this lock is what makes connect idempotent.
    client: Mutex<Option<Arc<RpcClient>>>,
    state: Arc<watch::Sender<ConnectionState>>,
    notifications: broadcast::Sender<Value>,
    tools_available: AtomicUsize,
    launches: AtomicU64,
    closed: AtomicBool,
}

impl BackendConnection {
    pub fn new(launcher: Arc<dyn Launcher>, config: &BackendConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Absent);
        let (notifications, _) = broadcast::channel(64);
        Self {
            launcher,
            backend_url: config.url.clone(),
            handshake_timeout: config.handshake_timeout(),
            call_timeout: config.call_timeout(),
            client: Mutex::new(None),
            state: Arc::new(state),
            notifications,
            tools_available: AtomicUsize::new(0),
            launches: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Connection backed by a real child process.
    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(Arc::new(ProcessLauncher::from_config(config)), config)
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Never blocks and never starts the child.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Tool count from the most recent successful listing.
    pub fn tools_available(&self) -> usize {
        self.tools_available.load(Ordering::Relaxed)
    }

    /// How many times a child has been launched.
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    /// Server-initiated messages from the child.
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.notifications.subscribe()
    }

    /// Return the live client, starting the child if there is none.
    pub async fn ensure_connected(&self) -> Result<Arc<RpcClient>, BridgeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::ShutdownInProgress);
        }

        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            if !client.is_closed() {
                return Ok(client.clone());
            }
        }
        if let Some(stale) = slot.take() {
            tracing::info!("Reaping dead backend connection before reconnecting");
            stale.close().await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::ShutdownInProgress);
        }

        self.state.send_replace(ConnectionState::Connecting);
        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.handshake_timeout, self.connect()).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::backend(format!(
                "handshake did not complete within {:?}",
                self.handshake_timeout
            ))),
        };

        match outcome {
            Ok(client) => {
                *slot = Some(client.clone());
                self.state.send_replace(ConnectionState::Ready);
                metrics::record_backend_launch("ready");
                tracing::info!(
                    backend_url = %self.backend_url,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Backend connection ready"
                );
                Ok(client)
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Failed);
                metrics::record_backend_launch("failed");
                tracing::error!(
                    backend_url = %self.backend_url,
                    error = %e,
                    "Backend connection failed"
                );
                Err(e)
            }
        }
    }

    async fn connect(&self) -> Result<Arc<RpcClient>, BridgeError> {
        self.launches.fetch_add(1, Ordering::Relaxed);
        tracing::info!(launcher = %self.launcher.describe(), "Starting backend");
        let transport = self.launcher.launch().await?;

        let state = self.state.clone();
        let client = Arc::new(RpcClient::start(
            transport,
            self.notifications.clone(),
            move || {
                state.send_if_modified(|s| {
                    if *s == ConnectionState::Ready {
                        *s = ConnectionState::Failed;
                        true
                    } else {
                        false
                    }
                });
            },
        ));

        let init = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let server = client
            .request("initialize", Some(init), self.handshake_timeout)
            .await
            .map_err(|e| match e {
                BridgeError::Domain(err) => {
                    BridgeError::backend(format!("initialize rejected: {}", err.message))
                }
                other => other,
            })?;
        client.notify("notifications/initialized", None).await?;

        tracing::debug!(server_info = %server["serverInfo"], "Backend handshake complete");
        Ok(client)
    }

    /// Forward `tools/list`. `params` (e.g. a pagination cursor) pass through.
    pub async fn list_tools(&self, params: Option<Value>) -> Result<Value, BridgeError> {
        let result = self.forward("tools/list", params).await?;
        if let Some(tools) = result.get("tools").and_then(Value::as_array) {
            self.tools_available.store(tools.len(), Ordering::Relaxed);
        }
        Ok(result)
    }

    /// Forward `tools/call` for the named tool.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BridgeError> {
        if name.trim().is_empty() {
            return Err(BridgeError::MalformedRequest(
                "tool name must be a non-empty string".into(),
            ));
        }
        self.forward("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await
    }

    async fn forward(&self, method: &str, params: Option<Value>) -> Result<Value, BridgeError> {
        let start = Instant::now();
        let client = self.ensure_connected().await?;

        let logged = params.clone().unwrap_or_default();
        tracing::debug!(method, params = %logged, "Forwarding to backend");
        let result = client.request(method, params, self.call_timeout).await;
        match &result {
            Ok(value) => tracing::debug!(method, result = %value, "Backend responded"),
            Err(e) => tracing::debug!(method, error = %e, "Backend call failed"),
        }

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::record_rpc_call(method, outcome, start);
        result
    }

    /// Shut the child down. Later calls fail with `ShutdownInProgress`.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let client = self.client.lock().await.take();
        if let Some(client) = client {
            tracing::info!(in_flight = client.in_flight(), "Closing backend connection");
            client.close().await;
        }
        self.state.send_replace(ConnectionState::Absent);
    }
}
