//! Liveness endpoint answered by the proxy itself.
//!
//! `GET /health` and `GET /status` (origin-form, not proxied) return a small
//! JSON document. These never pass through access control, so orchestrators
//! can check an authenticated proxy without credentials.

use std::time::Instant;

use hyper::{Method, StatusCode};
use serde_json::json;

use crate::http::response::{self, ProxyResponse};
use crate::net::ConnectionTracker;

/// Paths served by the health endpoint.
pub fn is_health_request(method: &Method, path: &str) -> bool {
    (method == Method::GET || method == Method::HEAD) && matches!(path, "/health" | "/status")
}

/// Snapshot of process state reported by the health endpoint.
pub struct HealthReport<'a> {
    pub started_at: Instant,
    pub connections: &'a ConnectionTracker,
    pub tunnels: &'a ConnectionTracker,
    pub auth_enabled: bool,
    pub allowlist_enabled: bool,
}

impl HealthReport<'_> {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": self.started_at.elapsed().as_secs(),
            "active_connections": self.connections.active_count(),
            "active_tunnels": self.tunnels.active_count(),
            "auth_enabled": self.auth_enabled,
            "allowlist_enabled": self.allowlist_enabled,
        })
    }

    pub fn respond(&self) -> ProxyResponse {
        response::json(StatusCode::OK, &self.to_json())
    }
}
