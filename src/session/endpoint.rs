//! The RPC-server-facing half of a session.
//!
//! Answers the MCP lifecycle methods itself and hands `tools/list` and
//! `tools/call` to the shared [`BackendConnection`]. Payloads are not
//! inspected beyond what routing needs.

use futures_util::future::join_all;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backend::{BackendConnection, PROTOCOL_VERSION};
use crate::error::BridgeError;
use crate::rpc::{Incoming, Request, RequestId, Response, RpcError};

pub struct ServerEndpoint {
    backend: Arc<BackendConnection>,
    closed: AtomicBool,
}

impl ServerEndpoint {
    pub fn new(backend: Arc<BackendConnection>) -> Self {
        Self {
            backend,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Calls already running are left to finish; new ones are refused.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Handle every element of a payload concurrently, returning responses in
    /// input order. Notifications and client replies produce no response.
    pub async fn dispatch(&self, items: Vec<Incoming>) -> Vec<Response> {
        let replies = join_all(items.into_iter().map(|item| self.dispatch_one(item))).await;
        replies.into_iter().flatten().collect()
    }

    async fn dispatch_one(&self, item: Incoming) -> Option<Response> {
        match item {
            Incoming::Call(request) => Some(self.handle_call(request).await),
            Incoming::Notification(request) => {
                tracing::debug!(method = %request.method, "Client notification");
                None
            }
            Incoming::Reply(_) => {
                tracing::debug!("Dropping client reply; no server requests are outstanding");
                None
            }
            Incoming::Invalid { id, reason } => Some(Response::failure(
                id,
                RpcError::new(RpcError::INVALID_REQUEST, reason),
            )),
        }
    }

    /// Handle one call. Always yields a response with the caller's `id`.
    pub async fn handle_call(&self, request: Request) -> Response {
        let id = request.id.clone().unwrap_or(RequestId::Number(0));
        let method = request.method.as_str();

        if self.is_closed() {
            return Response::failure(Some(id), BridgeError::ShutdownInProgress.to_rpc_error());
        }

        tracing::debug!(method, rpc_id = %id, "Handling call");
        let outcome = match method {
            "initialize" => Ok(self.initialize_result(request.params.as_ref())),
            "ping" => Ok(json!({})),
            "tools/list" => self.backend.list_tools(request.params).await,
            "tools/call" => self.call_tool(request.params).await,
            other => {
                return Response::failure(Some(id), RpcError::method_not_found(other));
            }
        };

        match outcome {
            Ok(result) => Response::success(id, result),
            Err(e) => {
                tracing::warn!(method = %request.method, rpc_id = %id, error = %e, "Call failed");
                Response::failure(Some(id), e.to_rpc_error())
            }
        }
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, BridgeError> {
        let params = params.unwrap_or(Value::Null);
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::MalformedRequest("`name` must be a string".into()))?;
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        self.backend.call_tool(name, arguments).await
    }

    fn initialize_result(&self, params: Option<&Value>) -> Value {
        let version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION);
        json!({
            "protocolVersion": version,
            "capabilities": { "tools": { "listChanged": true } },
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Launcher, Transport};
    use crate::config::BackendConfig;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl Launcher for Unreachable {
        async fn launch(&self) -> Result<Transport, BridgeError> {
            Err(BridgeError::backend("connection refused"))
        }

        fn describe(&self) -> String {
            "unreachable".into()
        }
    }

    fn endpoint() -> ServerEndpoint {
        let backend = BackendConnection::new(Arc::new(Unreachable), &BackendConfig::default());
        ServerEndpoint::new(Arc::new(backend))
    }

    fn call(id: i64, method: &str, params: Option<Value>) -> Request {
        Request::new(RequestId::Number(id), method, params)
    }

    #[tokio::test]
    async fn initialize_is_answered_locally() {
        let ep = endpoint();
        let resp = ep
            .handle_call(call(1, "initialize", Some(json!({"protocolVersion": "2024-11-05"}))))
            .await;
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert!(result["capabilities"]["tools"].is_object());
        assert_eq!(ep.backend.launches(), 0);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let resp = endpoint().handle_call(call(5, "resources/list", None)).await;
        assert_eq!(resp.id, Some(RequestId::Number(5)));
        assert_eq!(resp.error.unwrap().code, RpcError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn unreachable_backend_becomes_rpc_error() {
        let resp = endpoint().handle_call(call(7, "tools/list", None)).await;
        assert_eq!(resp.id, Some(RequestId::Number(7)));
        assert_eq!(resp.error.unwrap().code, crate::error::BACKEND_UNAVAILABLE);
    }

    #[tokio::test]
    async fn tools_call_without_name_is_invalid_params() {
        let resp = endpoint()
            .handle_call(call(3, "tools/call", Some(json!({"arguments": {}}))))
            .await;
        assert_eq!(resp.error.unwrap().code, RpcError::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn batch_yields_responses_in_order_and_skips_notifications() {
        let items = vec![
            Incoming::Call(call(1, "ping", None)),
            Incoming::Notification(Request::notification("notifications/initialized", None)),
            Incoming::Invalid {
                id: Some(RequestId::Number(2)),
                reason: "bad".into(),
            },
            Incoming::Call(call(3, "ping", None)),
        ];
        let responses = endpoint().dispatch(items).await;
        let ids: Vec<_> = responses.iter().map(|r| r.id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                Some(RequestId::Number(1)),
                Some(RequestId::Number(2)),
                Some(RequestId::Number(3))
            ]
        );
        assert_eq!(responses[1].error.as_ref().unwrap().code, RpcError::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn closed_endpoint_refuses_calls() {
        let ep = endpoint();
        ep.close();
        let resp = ep.handle_call(call(9, "ping", None)).await;
        assert_eq!(resp.error.unwrap().code, crate::error::SHUTDOWN_IN_PROGRESS);
    }
}
