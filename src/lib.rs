//! HTTP-to-stdio bridge for Model Context Protocol servers.
//!
//! Exposes a locally spawned MCP child process (whose browser backend only
//! trusts same-host connections) to remote clients over HTTP and SSE.

pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod rpc;
pub mod session;
pub mod stdio;

pub use config::BridgeConfig;
pub use error::BridgeError;
pub use http::HttpServer;
pub use lifecycle::{Bridge, Shutdown};
