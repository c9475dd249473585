//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Pick the JSON or pretty formatter
//! - Configure log level from `RUST_LOG`, falling back to config

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber.
///
/// `to_stderr` must be set when stdout carries protocol traffic.
pub fn init_logging(config: &ObservabilityConfig, to_stderr: bool) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("mcp_bridge={},tower_http=info", config.log_level).into()
    });

    let writer = || {
        if to_stderr {
            BoxMakeWriter::new(std::io::stderr)
        } else {
            BoxMakeWriter::new(std::io::stdout)
        }
    };

    let json = config.log_format == "json";
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(writer())))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(writer())))
        .try_init()
}
