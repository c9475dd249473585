//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms via `metrics`)
//!
//! Consumers:
//!     → stdout/stderr (pretty or JSON lines)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through HTTP handlers into every log line
//! - Metrics are cheap (atomic increments) and no-ops until the exporter is installed
//! - In stdio mode logs go to stderr so stdout stays a protocol channel

pub mod logging;
pub mod metrics;
