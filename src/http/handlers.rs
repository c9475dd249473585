//! Request handlers: health, the `/mcp` bridge, and not-found.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::SessionMode;
use crate::error::BridgeError;
use crate::http::server::AppState;
use crate::rpc::{parse_payload, Response as RpcResponse};
use crate::session::{Session, SessionRegistry, SHARED_SESSION_ID};

pub const MCP_SESSION_ID: &str = "mcp-session-id";
pub const X_REQUEST_ID: &str = "x-request-id";

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub backend_url: String,
    pub backend_connected: bool,
    pub backend_state: &'static str,
    pub tools_available: usize,
    pub active_sessions: usize,
}

/// `GET /health`. Reads connection state only; never starts the child.
pub async fn health(State(state): State<AppState>, method: Method) -> Response {
    if method != Method::GET {
        return not_found().await.into_response();
    }
    let backend = state.registry.backend();
    Json(HealthStatus {
        status: "ok",
        backend_url: backend.backend_url().to_string(),
        backend_connected: backend.is_connected(),
        backend_state: backend.state().as_str(),
        tools_available: backend.tools_available(),
        active_sessions: state.registry.len(),
    })
    .into_response()
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        "Not found. Use POST/GET /mcp for the MCP bridge or GET /health for status.",
    )
}

/// Every method on `/mcp` and `/mcp/*`.
pub async fn mcp(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id(&headers);

    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    if method != Method::GET && method != Method::POST && method != Method::PUT {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &format!("method {} not supported on /mcp", method),
            &request_id,
        );
    }

    let session_id = resolve_session_id(state.session_mode, &headers);
    let session = match state.registry.get_or_create(&session_id) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(request_id = %request_id, session_id = %session_id, error = %e, "No session available");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), &request_id);
        }
    };

    let mut response = if method == Method::GET {
        open_stream(&state.registry, session, &request_id)
    } else {
        handle_rpc(&state.registry, session, &headers, body, &request_id).await
    };

    if state.session_mode == SessionMode::PerClient {
        if let Ok(value) = HeaderValue::from_str(&session_id) {
            response.headers_mut().insert(MCP_SESSION_ID, value);
        }
    }
    response
}

fn open_stream(registry: &Arc<SessionRegistry>, session: Arc<Session>, request_id: &str) -> Response {
    let (generation, rx) = match session.open_stream() {
        Ok(stream) => stream,
        Err(e) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), request_id);
        }
    };
    tracing::info!(
        request_id = %request_id,
        session_id = %session.id(),
        generation,
        "Event stream opened"
    );

    let guard = StreamGuard {
        registry: registry.clone(),
        session,
        generation,
    };
    Sse::new(event_stream(rx, guard))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn event_stream(
    rx: tokio::sync::mpsc::Receiver<Value>,
    guard: StreamGuard,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let message = rx.recv().await?;
        Some((Event::default().event("message").json_data(message), (rx, guard)))
    })
}

/// Dropped when the SSE body goes away, whether the client disconnected or
/// the session closed the channel.
struct StreamGuard {
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    generation: u64,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.registry.stream_ended(&self.session, self.generation);
    }
}

/// Held for the duration of one POST/PUT exchange. Dropping it lets a
/// stream-less session drain.
struct ExchangeGuard {
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
}

impl ExchangeGuard {
    fn begin(registry: &Arc<SessionRegistry>, session: &Arc<Session>) -> Result<Self, BridgeError> {
        session.begin_exchange()?;
        Ok(Self {
            registry: registry.clone(),
            session: session.clone(),
        })
    }
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        self.registry.exchange_ended(&self.session);
    }
}

async fn handle_rpc(
    registry: &Arc<SessionRegistry>,
    session: Arc<Session>,
    headers: &HeaderMap,
    body: Bytes,
    request_id: &str,
) -> Response {
    let exchange = match ExchangeGuard::begin(registry, &session) {
        Ok(guard) => guard,
        Err(e) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), request_id);
        }
    };
    let payload = match parse_payload(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Rejecting request body");
            return error_response(StatusCode::BAD_REQUEST, &e.to_string(), request_id);
        }
    };
    let is_batch = payload.is_batch();

    // Runs detached so a client hanging up cannot cancel a call the child
    // is already working on.
    let worker = session.clone();
    let dispatched = tokio::spawn(async move {
        let responses = worker.endpoint().dispatch(payload.into_items()).await;
        (responses, exchange)
    });
    let (responses, exchange) = match dispatched.await {
        Ok(done) => done,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Dispatch task failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &BridgeError::backend("internal dispatch failure").to_string(),
                request_id,
            );
        }
    };

    if responses.is_empty() {
        return StatusCode::ACCEPTED.into_response();
    }

    let body = reply_body(is_batch, responses);
    let streamed = wants_event_stream_only(headers) && session.transport().send(body.clone());
    drop(exchange);
    if streamed {
        tracing::debug!(request_id = %request_id, session_id = %session.id(), "Response delivered on event stream");
        return StatusCode::ACCEPTED.into_response();
    }
    (StatusCode::OK, Json(body)).into_response()
}

fn reply_body(is_batch: bool, responses: Vec<RpcResponse>) -> Value {
    if is_batch {
        json!(responses)
    } else {
        responses
            .into_iter()
            .next()
            .map(|r| json!(r))
            .unwrap_or(Value::Null)
    }
}

fn resolve_session_id(mode: SessionMode, headers: &HeaderMap) -> String {
    match mode {
        SessionMode::Shared => SHARED_SESSION_ID.to_string(),
        SessionMode::PerClient => headers
            .get(MCP_SESSION_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    }
}

fn wants_event_stream_only(headers: &HeaderMap) -> bool {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    accept.contains("text/event-stream")
        && !accept.contains("application/json")
        && !accept.contains("*/*")
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Transport-level failure body: `{error, request_id}`.
pub fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    (
        status,
        Json(json!({ "error": message, "request_id": request_id })),
    )
        .into_response()
}
