//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → backend connection → session registry → eager connect → transport
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs + http/server.rs):
//!     Trigger → close sessions (transport, then endpoint)
//!             → drain in-flight requests (bounded)
//!             → close backend child → exit 0
//! ```
//!
//! # Design Decisions
//! - Shutdown is best-effort, not transactional: failures are logged and skipped
//! - In-flight calls finish before the child is stopped

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use startup::{Bridge, StartupError};
