//! Shared utilities for integration tests: an in-memory MCP child and a
//! bridge bound to an ephemeral port.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use mcp_bridge::backend::{BackendConnection, Launcher, Transport};
use mcp_bridge::config::{BridgeConfig, SessionMode};
use mcp_bridge::error::BridgeError;
use mcp_bridge::http::HttpServer;
use mcp_bridge::lifecycle::Shutdown;
use mcp_bridge::session::SessionRegistry;

/// Tool that makes the fake child emit a notification before replying.
pub const NOTIFY_TOOL: &str = "browser_notify";

/// Launches an in-process MCP server speaking newline-delimited JSON-RPC.
#[derive(Default)]
pub struct FakeChild {
    pub launches: AtomicUsize,
    /// Delay before the child's streams are handed over.
    pub launch_delay: Duration,
    /// Delay before every `tools/call` reply.
    pub call_delay: Duration,
}

impl FakeChild {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delays(launch_delay: Duration, call_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            launch_delay,
            call_delay,
            ..Self::default()
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Launcher for FakeChild {
    async fn launch(&self) -> Result<Transport, BridgeError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.launch_delay).await;

        let (bridge_out, child_in) = duplex(64 * 1024);
        let (child_out, bridge_in) = duplex(64 * 1024);
        tokio::spawn(serve_child(child_in, child_out, self.call_delay));
        Ok(Transport::new(Box::new(bridge_in), Box::new(bridge_out)))
    }

    fn describe(&self) -> String {
        "fake-child".to_string()
    }
}

async fn serve_child(input: DuplexStream, output: DuplexStream, call_delay: Duration) {
    let output = Arc::new(tokio::sync::Mutex::new(output));
    let mut lines = BufReader::new(input).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let Some(id) = message.get("id").cloned() else {
            continue;
        };
        let output = output.clone();
        tokio::spawn(async move {
            let method = message["method"].as_str().unwrap_or_default().to_string();
            if method == "tools/call" {
                tokio::time::sleep(call_delay).await;
            }
            let tool = message["params"]["name"].as_str().unwrap_or_default().to_string();
            if tool == NOTIFY_TOOL {
                let note = json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/message",
                    "params": {"level": "info", "data": "page loaded"},
                });
                write(&output, &note).await;
            }
            let reply = child_reply(id, &method, &tool, &message["params"]);
            write(&output, &reply).await;
        });
    }
}

fn child_reply(id: Value, method: &str, tool: &str, params: &Value) -> Value {
    match method {
        "initialize" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": "2025-03-26",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "fake-playwright", "version": "0.0.1"},
            },
        }),
        "tools/list" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"tools": [
                {"name": "browser_navigate", "inputSchema": {"type": "object"}},
                {"name": NOTIFY_TOOL, "inputSchema": {"type": "object"}},
            ]},
        }),
        "tools/call" if tool == "browser_navigate" || tool == NOTIFY_TOOL => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"content": [{"type": "text", "text": format!("ran {}", tool)}], "echo": params["arguments"]},
        }),
        "tools/call" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32602, "message": format!("Tool {} not found", tool)},
        }),
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": "Method not found"},
        }),
    }
}

async fn write(output: &tokio::sync::Mutex<DuplexStream>, message: &Value) {
    let mut bytes = serde_json::to_vec(message).unwrap();
    bytes.push(b'\n');
    let mut out = output.lock().await;
    let _ = out.write_all(&bytes).await;
}

/// A bridge serving HTTP on an ephemeral port.
pub struct TestBridge {
    pub addr: SocketAddr,
    pub registry: Arc<SessionRegistry>,
    pub shutdown: Arc<Shutdown>,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestBridge {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn backend(&self) -> &Arc<BackendConnection> {
        self.registry.backend()
    }
}

pub fn test_config(mode: SessionMode) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = 0;
    config.sessions.mode = mode;
    config.sessions.grace_delay_ms = 50;
    config.backend.handshake_timeout_secs = 5;
    config.backend.call_timeout_secs = 5;
    config.shutdown_timeout_secs = 5;
    config
}

pub async fn start_bridge(launcher: Arc<dyn Launcher>, config: BridgeConfig) -> TestBridge {
    let backend = Arc::new(BackendConnection::new(launcher, &config.backend));
    let registry = SessionRegistry::new(backend, config.sessions.grace_delay());
    let shutdown = Arc::new(Shutdown::new());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(&config, registry.clone());
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestBridge {
        addr,
        registry,
        shutdown,
        handle,
    }
}

pub fn rpc(id: u64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

/// Read SSE chunks until one carries a `data:` line, returning its JSON.
pub async fn next_event(res: &mut reqwest::Response) -> Option<Value> {
    let mut buffer = String::new();
    loop {
        let chunk = res.chunk().await.ok()??;
        buffer.push_str(&String::from_utf8_lossy(&chunk));
        for line in buffer.lines() {
            if let Some(data) = line.strip_prefix("data:") {
                if let Ok(value) = serde_json::from_str(data.trim()) {
                    return Some(value);
                }
            }
        }
    }
}

/// Poll `check` every 25ms until it holds or `limit` elapses.
pub async fn eventually<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}
