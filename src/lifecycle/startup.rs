//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter when enabled
//! - Build the proxy server from the validated configuration
//! - Bind the listener and serve until a termination signal
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener binds last (traffic only when ready)
//! - Logging is initialized by the caller, before anything here can log

use std::net::SocketAddr;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::ProxyServer;
use crate::lifecycle::{signals, Shutdown};
use crate::net::Listener;
use crate::observability::metrics;

/// Run the proxy until SIGINT/SIGTERM, then drain and return.
pub async fn run(config: ProxyConfig) -> Result<(), ProxyError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener_config = config.listener.clone();
    let server = ProxyServer::new(config);
    let listener = Listener::bind(&listener_config).await?;

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        signals::wait_for_termination().await;
        trigger.trigger();
    });

    server.run(listener, shutdown).await;
    Ok(())
}
