//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the shared backend connection and the session registry
//! - Kick off the eager connect + tool-listing smoke test
//! - Install the signal handler and run the selected transport
//!
//! # Design Decisions
//! - Fail fast: a listener that cannot bind is fatal
//! - Eager connect runs in the background; a failure there only logs, the
//!   first call retries lazily

use std::sync::Arc;
use tokio::net::TcpListener;

use crate::backend::{BackendConnection, Launcher};
use crate::config::{BridgeConfig, TransportMode};
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::session::SessionRegistry;
use crate::stdio;

/// Error type for bridge startup and serving.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },
    #[error("transport failed: {0}")]
    Serve(#[from] std::io::Error),
}

/// The assembled bridge: one backend connection, one session registry.
pub struct Bridge {
    config: BridgeConfig,
    registry: Arc<SessionRegistry>,
    shutdown: Arc<Shutdown>,
}

impl Bridge {
    /// Must be called from within a Tokio runtime.
    pub fn new(config: BridgeConfig) -> Self {
        let backend = Arc::new(BackendConnection::from_config(&config.backend));
        Self::with_backend(config, backend)
    }

    pub fn with_launcher(config: BridgeConfig, launcher: Arc<dyn Launcher>) -> Self {
        let backend = Arc::new(BackendConnection::new(launcher, &config.backend));
        Self::with_backend(config, backend)
    }

    fn with_backend(config: BridgeConfig, backend: Arc<BackendConnection>) -> Self {
        let registry = SessionRegistry::new(backend, config.sessions.grace_delay());
        Self {
            config,
            registry,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn shutdown(&self) -> &Arc<Shutdown> {
        &self.shutdown
    }

    /// Connect and list tools once, logging the outcome.
    pub async fn warm_up(backend: Arc<BackendConnection>) {
        match backend.list_tools(None).await {
            Ok(result) => {
                let names: Vec<&str> = result
                    .get("tools")
                    .and_then(|t| t.as_array())
                    .map(|tools| {
                        tools
                            .iter()
                            .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
                            .collect()
                    })
                    .unwrap_or_default();
                tracing::info!(tools = names.len(), names = ?names, "Backend reachable");
            }
            Err(e) => tracing::warn!(
                error = %e,
                "Eager backend connect failed; will retry on first request"
            ),
        }
    }

    /// Run until a termination signal (or an explicit trigger) and drain.
    pub async fn run(self) -> Result<(), StartupError> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let signal = signals::wait_for_termination().await;
            tracing::info!(signal, "Termination signal received");
            shutdown.trigger();
        });

        if self.config.backend.eager_connect {
            tokio::spawn(Self::warm_up(self.registry.backend().clone()));
        }

        match self.config.transport {
            TransportMode::Http => {
                let address = self.config.listener.bind_address();
                let listener = TcpListener::bind(&address)
                    .await
                    .map_err(|source| StartupError::Bind { address, source })?;
                let server = HttpServer::new(&self.config, self.registry.clone());
                server.run(listener, self.shutdown.subscribe()).await?;
            }
            TransportMode::Stdio => {
                let result = stdio::run_stdio(self.registry.clone(), self.shutdown.subscribe()).await;
                self.registry.close_all();
                self.registry.backend().close().await;
                result?;
            }
        }

        tracing::info!("Shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ConnectionState, ProcessLauncher};

    #[tokio::test]
    async fn failed_warm_up_leaves_bridge_serviceable() {
        let mut config = BridgeConfig::default();
        config.backend.command = "/nonexistent/mcp-child".into();
        let launcher = Arc::new(ProcessLauncher::from_config(&config.backend));
        let bridge = Bridge::with_launcher(config, launcher);

        let backend = bridge.registry().backend().clone();
        Bridge::warm_up(backend.clone()).await;
        assert_eq!(backend.state(), ConnectionState::Failed);
        assert!(bridge.registry().get_or_create("shared").is_ok());
        assert!(!bridge.shutdown().is_triggered());
    }
}
