//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (CORS, tracing, body limit, request ID)
//! - Bind server to listener
//! - Drain sessions, then in-flight requests, then the backend on shutdown

use axum::{
    extract::DefaultBodyLimit,
    routing::any,
    Router,
};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::backend::BackendConnection;
use crate::config::{BridgeConfig, SessionMode};
use crate::http::handlers;
use crate::lifecycle::ShutdownSignal;
use crate::session::SessionRegistry;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub session_mode: SessionMode,
}

/// HTTP front of the bridge.
pub struct HttpServer {
    router: Router,
    registry: Arc<SessionRegistry>,
    shutdown_timeout: Duration,
}

impl HttpServer {
    pub fn new(config: &BridgeConfig, registry: Arc<SessionRegistry>) -> Self {
        let state = AppState {
            registry: registry.clone(),
            session_mode: config.sessions.mode,
        };
        Self {
            router: Self::build_router(config, state),
            registry,
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(config: &BridgeConfig, state: AppState) -> Router {
        Router::new()
            .route("/health", any(handlers::health))
            .route("/mcp", any(handlers::mcp))
            .route("/mcp/{*rest}", any(handlers::mcp))
            .fallback(handlers::not_found)
            .with_state(state)
            .layer(DefaultBodyLimit::max(config.listener.max_body_bytes))
            .layer(CorsLayer::permissive())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn backend(&self) -> &Arc<BackendConnection> {
        self.registry.backend()
    }

    /// Serve until `shutdown` fires, then drain and close the backend.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let registry = self.registry.clone();
        let shutdown_timeout = self.shutdown_timeout;
        let (drain_started_tx, drain_started_rx) = oneshot::channel::<()>();
        let graceful = async move {
            shutdown.recv().await;
            tracing::info!("Shutdown signal received, closing sessions");
            // Ending the event streams lets graceful shutdown complete.
            registry.close_all();
            let _ = drain_started_tx.send(());
        };

        let serve = axum::serve(listener, self.router)
            .with_graceful_shutdown(graceful)
            .into_future();
        let deadline = async move {
            match drain_started_rx.await {
                Ok(()) => tokio::time::sleep(shutdown_timeout).await,
                Err(_) => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = serve => result?,
            _ = deadline => {
                tracing::warn!(
                    timeout_secs = shutdown_timeout.as_secs(),
                    "Requests still in flight after shutdown timeout"
                );
            }
        }

        self.registry.backend().close().await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    fn server() -> HttpServer {
        let config = BridgeConfig::default();
        let backend = Arc::new(BackendConnection::from_config(&config.backend));
        let registry = SessionRegistry::new(backend, config.sessions.grace_delay());
        HttpServer::new(&config, registry)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_side_effect_free() {
        let server = server();
        let response = server
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["backend_state"], "absent");
        assert_eq!(server.backend().launches(), 0);
    }

    #[tokio::test]
    async fn request_ids_are_assigned_and_echoed() {
        let response = server()
            .router()
            .oneshot(Request::get("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn ping_is_answered_locally() {
        let server = server();
        let request = Request::post("/mcp/v1")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"jsonrpc":"2.0","id":"p","method":"ping"}"#))
            .unwrap();
        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], "p");
        assert_eq!(body["result"], serde_json::json!({}));
        assert_eq!(server.backend().launches(), 0);
    }

    #[tokio::test]
    async fn oversized_bodies_are_refused() {
        let mut config = BridgeConfig::default();
        config.listener.max_body_bytes = 16;
        let backend = Arc::new(BackendConnection::from_config(&config.backend));
        let registry = SessionRegistry::new(backend, config.sessions.grace_delay());
        let router = HttpServer::new(&config, registry).router();

        let request = Request::post("/mcp")
            .body(Body::from(vec![b' '; 1024]))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
