//! Configuration validation.
//!
//! Serde handles syntax; this module checks values. Validation is a pure
//! function that reports every problem, not just the first.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::schema::ProxyConfig;
use crate::security::allowlist::AllowEntry;

/// Upper bound for every duration setting: 30 days.
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("auth.username and auth.password must be set together")]
    PartialCredentials,

    #[error("auth.username must not contain ':'")]
    UsernameHasColon,

    #[error("auth.realm must not contain '\"'")]
    RealmHasQuote,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0} must not exceed {max} seconds", max = MAX_DURATION_SECS)]
    TooLarge(&'static str),

    #[error("access.allowed_ips entry '{0}' is not an IP address or CIDR network")]
    BadAllowEntry(String),

    #[error("observability.log_level '{0}' is not a valid filter")]
    BadLogLevel(String),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    BadMetricsAddress(String),
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let auth = &config.auth;
    if auth.username.is_some() != auth.password.is_some() {
        errors.push(ValidationError::PartialCredentials);
    }
    if auth.username.as_deref().is_some_and(|u| u.contains(':')) {
        errors.push(ValidationError::UsernameHasColon);
    }
    if auth.realm.contains('"') {
        errors.push(ValidationError::RealmHasQuote);
    }

    if config.brute_force.max_attempts == 0 {
        errors.push(ValidationError::Zero("brute_force.max_attempts"));
    }

    let durations = [
        ("timeouts.request_secs", config.timeouts.request_secs, true),
        ("timeouts.shutdown_grace_secs", config.timeouts.shutdown_grace_secs, false),
        ("brute_force.window_secs", config.brute_force.window_secs, true),
        ("brute_force.max_lockout_secs", config.brute_force.max_lockout_secs, true),
        ("brute_force.sweep_interval_secs", config.brute_force.sweep_interval_secs, true),
    ];
    for (name, secs, nonzero) in durations {
        if nonzero && secs == 0 {
            errors.push(ValidationError::Zero(name));
        } else if secs > MAX_DURATION_SECS {
            errors.push(ValidationError::TooLarge(name));
        }
    }

    for entry in &config.access.allowed_ips {
        if entry.parse::<AllowEntry>().is_err() {
            errors.push(ValidationError::BadAllowEntry(entry.clone()));
        }
    }

    let level = &config.observability.log_level;
    if EnvFilter::try_new(level).is_err() {
        errors.push(ValidationError::BadLogLevel(level.clone()));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::BadMetricsAddress(obs.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
