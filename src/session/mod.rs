//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP exchange / stdio line
//!     → registry.rs (find-or-create session by id)
//!     → state.rs (Session: lifecycle Open → Draining → Closed)
//!         ├─ endpoint.rs (RPC-server side: initialize/ping locally, tools/* to backend)
//!         └─ transport.rs (event stream to the client)
//! ```
//!
//! # Design Decisions
//! - One child connection backs every session
//! - Teardown is a deferred state transition, cancelled if a stream re-attaches
//! - Closing order is transport first, then endpoint

pub mod endpoint;
pub mod registry;
pub mod state;
pub mod transport;

pub use endpoint::ServerEndpoint;
pub use registry::SessionRegistry;
pub use state::{Session, SessionState};
pub use transport::SessionTransport;

/// Session id used when every request shares one session.
pub const SHARED_SESSION_ID: &str = "shared";
