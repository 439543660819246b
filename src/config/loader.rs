//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the startup snapshot: optional TOML file, then process environment
/// overrides, then validation.
pub fn load(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => ProxyConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn read_file(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Apply environment overrides using `lookup` to read variables.
///
/// Empty values are ignored so that `PROXY_USERNAME=` in a container manifest
/// behaves like an unset variable.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(host) = get("PROXY_HOST") {
        config.listener.host = host;
    }
    if let Some(port) = get("PROXY_PORT") {
        config.listener.port = parse_env("PROXY_PORT", &port)?;
    }
    if let Some(user) = get("PROXY_USERNAME") {
        config.auth.username = Some(user);
    }
    if let Some(pass) = get("PROXY_PASSWORD") {
        config.auth.password = Some(pass);
    }
    if let Some(realm) = get("PROXY_AUTH_REALM") {
        config.auth.realm = realm;
    }
    if let Some(ips) = get("ALLOWED_IPS") {
        config.access.allowed_ips = ips
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(secs) = get("REQUEST_TIMEOUT_SECS") {
        config.timeouts.request_secs = parse_env("REQUEST_TIMEOUT_SECS", &secs)?;
    }
    if let Some(secs) = get("BRUTE_FORCE_WINDOW_SECS") {
        config.brute_force.window_secs = parse_env("BRUTE_FORCE_WINDOW_SECS", &secs)?;
    }
    if let Some(max) = get("BRUTE_FORCE_MAX_ATTEMPTS") {
        config.brute_force.max_attempts = parse_env("BRUTE_FORCE_MAX_ATTEMPTS", &max)?;
    }
    if let Some(level) = get("LOG_LEVEL") {
        config.observability.log_level = level;
    }
    if let Some(format) = get("LOG_FORMAT") {
        config.observability.log_format = format.parse().map_err(|_| ConfigError::Env {
            var: "LOG_FORMAT",
            value: format.clone(),
        })?;
    }

    Ok(())
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var,
        value: value.to_string(),
    })
}
