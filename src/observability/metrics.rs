//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by kind and status
//! - `proxy_request_duration_seconds` (histogram): time to response head
//! - `proxy_access_denied_total` (counter): gate rejections by reason
//! - `proxy_bruteforce_lockouts_total` (counter): lockouts started
//! - `proxy_active_connections` (gauge): accepted client connections
//! - `proxy_active_tunnels` (gauge): established CONNECT tunnels
//! - `proxy_tunnel_bytes_total` (counter): tunneled bytes by direction
//!
//! Recording is a no-op until [`init_metrics`] installs a recorder.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed request: `kind` is `relay`, `tunnel`, `health` or
/// `direct`.
pub fn record_request(kind: &'static str, status: u16, start: Instant) {
    counter!("proxy_requests_total", "kind" => kind, "status" => status.to_string()).increment(1);
    histogram!("proxy_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_denied(reason: &'static str) {
    counter!("proxy_access_denied_total", "reason" => reason).increment(1);
}

pub fn record_lockout() {
    counter!("proxy_bruteforce_lockouts_total").increment(1);
}

pub fn connection_opened() {
    gauge!("proxy_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("proxy_active_connections").decrement(1.0);
}

pub fn tunnel_opened() {
    gauge!("proxy_active_tunnels").increment(1.0);
}

/// Record a finished tunnel and the bytes it moved each way.
pub fn tunnel_closed(client_to_upstream: u64, upstream_to_client: u64) {
    gauge!("proxy_active_tunnels").decrement(1.0);
    counter!("proxy_tunnel_bytes_total", "direction" => "upstream").increment(client_to_upstream);
    counter!("proxy_tunnel_bytes_total", "direction" => "downstream").increment(upstream_to_client);
}
