//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, graceful shutdown)
//!     → handlers.rs
//!         /health  → connection state, no side effects
//!         /mcp*    → session lookup → POST: dispatch / GET: event stream / OPTIONS: CORS
//!         other    → 404
//! ```

pub mod handlers;
pub mod server;

pub use server::{AppState, HttpServer};
