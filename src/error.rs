//! Error taxonomy for the bridge.
//!
//! Every failure is either reported inside a JSON-RPC envelope (when it
//! happens while fulfilling a specific call) or as a transport-level HTTP
//! error. [`BridgeError::to_rpc_error`] gives the envelope form.

use std::time::Duration;

use crate::rpc::RpcError;

/// JSON-RPC code for an unreachable backend.
pub const BACKEND_UNAVAILABLE: i64 = -32000;
/// JSON-RPC code for a forwarded call that exceeded its deadline.
pub const UPSTREAM_TIMEOUT: i64 = -32001;
/// JSON-RPC code for a call arriving on a closed endpoint.
pub const SHUTDOWN_IN_PROGRESS: i64 = -32002;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// The child could not be spawned, did not finish its handshake, or the
    /// connection dropped.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A forwarded call did not complete in time.
    #[error("upstream call `{method}` timed out after {after:?}")]
    UpstreamTimeout { method: String, after: Duration },

    /// The inbound payload is not valid JSON or not a JSON-RPC envelope.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The child's own error response, passed through verbatim.
    #[error("backend error {}: {}", .0.code, .0.message)]
    Domain(RpcError),

    #[error("shutdown in progress")]
    ShutdownInProgress,
}

impl BridgeError {
    pub fn backend(reason: impl std::fmt::Display) -> Self {
        Self::BackendUnavailable(reason.to_string())
    }

    /// Convert into the error object carried by a JSON-RPC response.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Domain(err) => err.clone(),
            Self::BackendUnavailable(_) => RpcError::new(BACKEND_UNAVAILABLE, self.to_string()),
            Self::UpstreamTimeout { .. } => RpcError::new(UPSTREAM_TIMEOUT, self.to_string()),
            Self::MalformedRequest(_) => RpcError::new(RpcError::INVALID_PARAMS, self.to_string()),
            Self::ShutdownInProgress => RpcError::new(SHUTDOWN_IN_PROGRESS, self.to_string()),
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::UpstreamTimeout { .. } => "timeout",
            Self::MalformedRequest(_) => "malformed",
            Self::Domain(_) => "domain_error",
            Self::ShutdownInProgress => "shutdown",
        }
    }
}
