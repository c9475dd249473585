//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::BridgeConfig;
use crate::config::validation::{validate_config, ValidationError};

pub const ENV_HOST: &str = "MCP_BRIDGE_HOST";
pub const ENV_PORT: &str = "MCP_BRIDGE_PORT";
pub const ENV_BACKEND_URL: &str = "MCP_BRIDGE_BACKEND_URL";
pub const ENV_TRANSPORT: &str = "MCP_BRIDGE_TRANSPORT";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {name}: {reason}")]
    Env { name: &'static str, reason: String },
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from a TOML file without validating it.
pub fn load_file(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Apply `MCP_BRIDGE_*` overrides using the given lookup.
///
/// The lookup is injectable so tests never touch the process environment.
pub fn apply_env<F>(config: &mut BridgeConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup(ENV_HOST) {
        config.listener.host = host;
    }
    if let Some(port) = lookup(ENV_PORT) {
        config.listener.port = port.parse().map_err(|e: std::num::ParseIntError| {
            ConfigError::Env {
                name: ENV_PORT,
                reason: e.to_string(),
            }
        })?;
    }
    if let Some(url) = lookup(ENV_BACKEND_URL) {
        config.backend.url = url;
    }
    if let Some(mode) = lookup(ENV_TRANSPORT) {
        config.transport = mode.parse().map_err(|reason| ConfigError::Env {
            name: ENV_TRANSPORT,
            reason,
        })?;
    }
    Ok(())
}

/// Load the file (if any) and apply process environment overrides.
///
/// Not validated: callers layer their own overrides on top, then call
/// [`validate`].
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    load_with_env(path, |name| std::env::var(name).ok())
}

fn load_with_env<F>(path: Option<&Path>, lookup: F) -> Result<BridgeConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => load_file(path)?,
        None => BridgeConfig::default(),
    };
    apply_env(&mut config, lookup)?;
    Ok(config)
}

pub fn validate(config: &BridgeConfig) -> Result<(), ConfigError> {
    validate_config(config).map_err(ConfigError::Validation)
}
