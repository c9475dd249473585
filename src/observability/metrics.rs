//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_rpc_calls_total` (counter): forwarded calls by method, outcome
//! - `bridge_rpc_call_duration_seconds` (histogram): forwarded call latency
//! - `bridge_backend_launches_total` (counter): child launches by outcome
//! - `bridge_active_sessions` (gauge): sessions currently registered

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_rpc_call(method: &str, outcome: &'static str, start: Instant) {
    let method = method.to_string();
    counter!("bridge_rpc_calls_total", "method" => method.clone(), "outcome" => outcome)
        .increment(1);
    histogram!("bridge_rpc_call_duration_seconds", "method" => method)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_backend_launch(outcome: &'static str) {
    counter!("bridge_backend_launches_total", "outcome" => outcome).increment(1);
}

pub fn set_active_sessions(count: usize) {
    gauge!("bridge_active_sessions").set(count as f64);
}
