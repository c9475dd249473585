//! Child-process RPC connection.
//!
//! # Data Flow
//! ```text
//! session endpoint
//!     → connection.rs (ensure_connected: spawn once, handshake, state machine)
//!     → client.rs (assign id, write line to child stdin, await correlated reply)
//!     → launcher.rs (spawn `command args… <backend_url>` with piped stdio)
//! ```

pub mod client;
pub mod connection;
pub mod launcher;

pub use client::RpcClient;
pub use connection::{BackendConnection, ConnectionState, PROTOCOL_VERSION};
pub use launcher::{Launcher, ProcessLauncher, Transport};
