//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, port valid)
//! - Check the backend URL and launch command are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::{BridgeConfig, TransportMode};

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.transport == TransportMode::Http {
        if config.listener.port == 0 {
            errors.push(ValidationError::new("listener.port", "must be non-zero"));
        }
        if config.listener.host.trim().is_empty() {
            errors.push(ValidationError::new("listener.host", "must not be empty"));
        }
        if config.listener.max_body_bytes == 0 {
            errors.push(ValidationError::new("listener.max_body_bytes", "must be non-zero"));
        }
    }

    match url::Url::parse(&config.backend.url) {
        Ok(url) if url.host_str().is_none() => {
            errors.push(ValidationError::new("backend.url", "must include a host"));
        }
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::new("backend.url", e.to_string())),
    }

    if config.backend.command.trim().is_empty() {
        errors.push(ValidationError::new("backend.command", "must not be empty"));
    }
    if config.backend.handshake_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "backend.handshake_timeout_secs",
            "must be greater than zero",
        ));
    }
    if config.backend.call_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "backend.call_timeout_secs",
            "must be greater than zero",
        ));
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            "must be `pretty` or `json`",
        ));
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&BridgeConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_problem() {
        let mut config = BridgeConfig::default();
        config.listener.port = 0;
        config.backend.url = "not a url".into();
        config.backend.call_timeout_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["listener.port", "backend.url", "backend.call_timeout_secs"]
        );
    }

    #[test]
    fn stdio_mode_ignores_listener() {
        let mut config = BridgeConfig::default();
        config.transport = TransportMode::Stdio;
        config.listener.port = 0;
        assert!(validate_config(&config).is_ok());
    }
}
