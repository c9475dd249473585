//! MCP HTTP bridge.
//!
//! Runs a stdio MCP server (by default the Playwright MCP server pointed at
//! a local Chrome DevTools endpoint) and exposes it to remote clients.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                      BRIDGE                          │
//!                    │                                                      │
//!   POST/GET /mcp    │  ┌─────────┐    ┌──────────┐    ┌────────────────┐   │
//!   ─────────────────┼─▶│  http   │───▶│ session  │───▶│    backend     │───┼──▶ stdio child
//!                    │  │ server  │    │ registry │    │   connection   │   │    (MCP server)
//!   SSE events       │  └─────────┘    └──────────┘    └────────────────┘   │
//!   ◀────────────────┼───────────────── notifications ◀─────────┘           │
//!                    │                                                      │
//!                    │  config · observability · lifecycle (SIGTERM drain)  │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use mcp_bridge::config::loader::validate;
use mcp_bridge::config::{load_config, BridgeConfig, SessionMode, TransportMode};
use mcp_bridge::observability::{logging, metrics};
use mcp_bridge::Bridge;

#[derive(Parser)]
#[command(name = "mcp-bridge")]
#[command(about = "Expose a stdio MCP server over HTTP and SSE", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Browser DevTools endpoint handed to the child.
    #[arg(long)]
    backend_url: Option<String>,

    /// `http` or `stdio`.
    #[arg(long)]
    transport: Option<TransportMode>,

    /// `shared` or `per-client`.
    #[arg(long)]
    session_mode: Option<String>,

    /// `pretty` or `json`.
    #[arg(long)]
    log_format: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut BridgeConfig) -> Result<(), String> {
        if let Some(host) = self.host {
            config.listener.host = host;
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(url) = self.backend_url {
            config.backend.url = url;
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(mode) = self.session_mode {
            config.sessions.mode = match mode.as_str() {
                "shared" => SessionMode::Shared,
                "per-client" | "per_client" => SessionMode::PerClient,
                other => return Err(format!("unknown session mode `{}`", other)),
            };
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    cli.apply(&mut config)?;
    validate(&config)?;

    logging::init_logging(&config.observability, config.transport == TransportMode::Stdio)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mcp-bridge starting");
    tracing::info!(
        transport = ?config.transport,
        bind_address = %config.listener.bind_address(),
        backend_url = %config.backend.url,
        backend_command = %config.backend.command,
        session_mode = ?config.sessions.mode,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    if let Err(e) = Bridge::new(config).run().await {
        tracing::error!(error = %e, "Bridge failed");
        return Err(e.into());
    }
    Ok(())
}
