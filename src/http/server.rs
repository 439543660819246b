//! Proxy server: accept loop and per-connection HTTP/1 serving.
//!
//! # Responsibilities
//! - Accept TCP connections until shutdown
//! - Serve each connection with hyper's HTTP/1 server, upgrades enabled
//! - Run the brute-force ledger sweeper
//! - Drain live connections and tunnels on shutdown, bounded by the grace period
//!
//! The listener speaks raw HTTP/1 rather than going through a router: CONNECT
//! and absolute-form targets have to reach the dispatcher untouched.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::http::dispatch;
use crate::http::relay::HttpRelay;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionTracker, Listener};
use crate::observability::metrics;
use crate::security::{AccessControl, BruteForceLedger};

/// Backoff after an accept error that is not the peer's fault (e.g. EMFILE).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// State shared by every connection.
#[derive(Debug)]
pub struct ProxyState {
    pub config: ProxyConfig,
    pub access: AccessControl,
    pub relay: HttpRelay,
    pub connections: ConnectionTracker,
    pub tunnels: ConnectionTracker,
    pub started_at: Instant,
}

/// The forward proxy.
pub struct ProxyServer {
    state: Arc<ProxyState>,
}

impl ProxyServer {
    /// Build the server and its shared state from a validated configuration.
    pub fn new(config: ProxyConfig) -> Self {
        let ledger = Arc::new(BruteForceLedger::from_config(&config.brute_force));
        let access = AccessControl::new(&config, ledger);
        let relay = HttpRelay::new(config.timeouts.request());

        Self {
            state: Arc::new(ProxyState {
                config,
                access,
                relay,
                connections: ConnectionTracker::new(),
                tunnels: ConnectionTracker::new(),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn ledger(&self) -> &Arc<BruteForceLedger> {
        self.state.access.ledger()
    }

    /// Serve `listener` until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) {
        tracing::info!(
            address = %listener.local_addr(),
            auth_enabled = self.state.access.auth_enabled(),
            allowlist_enabled = self.state.access.allowlist_enabled(),
            request_timeout_secs = self.state.config.timeouts.request_secs,
            "Proxy server starting"
        );

        let sweeper = Arc::clone(self.ledger());
        tokio::spawn(sweeper.run_sweeper(
            self.state.config.brute_force.sweep_interval(),
            shutdown.subscribe(),
        ));

        let mut stop = shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer, shutdown.subscribe()),
                    Err(e) if e.is_transient() => {
                        tracing::debug!(error = %e, "Transient accept error");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                _ = stop.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }
        drop(listener);

        self.drain().await;
        tracing::info!("Proxy server stopped");
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, mut shutdown: broadcast::Receiver<()>) {
        let guard = self.state.connections.track();
        let id = guard.id();
        let span = tracing::info_span!("connection", conn = %id, peer = %peer);
        let state = Arc::clone(&self.state);

        tokio::spawn(
            async move {
                metrics::connection_opened();

                let service = service_fn(move |request: Request<Incoming>| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(dispatch::handle(&state, peer, id, request).await) }
                });

                let conn = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades();
                tokio::pin!(conn);

                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    _ = shutdown.recv() => {
                        conn.as_mut().graceful_shutdown();
                        conn.await
                    }
                };
                if let Err(e) = result {
                    tracing::debug!(error = %e, "Connection ended with error");
                }

                metrics::connection_closed();
                drop(guard);
            }
            .instrument(span),
        );
    }

    async fn drain(&self) {
        let grace = self.state.config.timeouts.shutdown_grace();
        let connections = &self.state.connections;
        let tunnels = &self.state.tunnels;

        tracing::info!(
            connections = connections.active_count(),
            tunnels = tunnels.active_count(),
            grace_secs = grace.as_secs(),
            "Draining"
        );

        let idle = async {
            connections.wait_idle().await;
            tunnels.wait_idle().await;
        };
        match tokio::time::timeout(grace, idle).await {
            Ok(()) => tracing::info!("All sessions drained"),
            Err(_) => tracing::warn!(
                connections = connections.active_count(),
                tunnels = tunnels.active_count(),
                "Drain deadline reached, abandoning remaining sessions"
            ),
        }
    }
}
