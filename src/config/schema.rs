//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Which surface the bridge exposes.
    pub transport: TransportMode,

    /// Listener configuration (host, port, body limit).
    pub listener: ListenerConfig,

    /// Child process and its backend endpoint.
    pub backend: BackendConfig,

    /// Session identity and teardown.
    pub sessions: SessionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Upper bound on draining in-flight requests after a termination signal.
    pub shutdown_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::default(),
            listener: ListenerConfig::default(),
            backend: BackendConfig::default(),
            sessions: SessionConfig::default(),
            observability: ObservabilityConfig::default(),
            shutdown_timeout_secs: 10,
        }
    }
}

impl BridgeConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Network-facing HTTP, or direct stdio passthrough for local use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Http,
    Stdio,
}

impl std::str::FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(TransportMode::Http),
            "stdio" => Ok(TransportMode::Stdio),
            other => Err(format!("unknown transport mode `{}` (expected http or stdio)", other)),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind host (e.g., "0.0.0.0").
    pub host: String,

    /// Listen port.
    pub port: u16,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl ListenerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8931,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Child process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Browser debugging endpoint, passed to the child as its final argument.
    pub url: String,

    /// Program used to launch the child.
    pub command: String,

    /// Arguments placed before the backend URL.
    pub args: Vec<String>,

    /// Spawn plus MCP handshake deadline in seconds.
    pub handshake_timeout_secs: u64,

    /// Deadline for each forwarded call in seconds.
    pub call_timeout_secs: u64,

    /// Connect at startup (falling back to lazy connect on failure).
    pub eager_connect: bool,
}

impl BackendConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9222".to_string(),
            command: "npx".to_string(),
            args: vec![
                "-y".to_string(),
                "@playwright/mcp@latest".to_string(),
                "--cdp-endpoint".to_string(),
            ],
            handshake_timeout_secs: 60,
            call_timeout_secs: 120,
            eager_connect: true,
        }
    }
}

/// How HTTP requests are mapped onto sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Every request lands on one shared session. A session holds a single
    /// event stream, so a newer GET replaces (and ends) an older client's
    /// stream, and replies routed to the stream go to whoever opened it last.
    #[default]
    Shared,
    /// Sessions are keyed by the `Mcp-Session-Id` header.
    PerClient,
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: SessionMode,

    /// Delay between a stream closing and its session being removed.
    pub grace_delay_ms: u64,
}

impl SessionConfig {
    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Shared,
            grace_delay_ms: 1000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9464".to_string(),
        }
    }
}
