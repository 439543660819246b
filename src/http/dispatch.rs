//! Per-request dispatch: classify → gate → delegate.
//!
//! # Data Flow
//! ```text
//! Request head
//!     → classify (CONNECT / absolute URL / health / origin-form / malformed)
//!     → AccessControl::check (proxied requests only)
//!     → tunnel.rs or relay.rs
//! ```
//!
//! Each request passes through the stages once; there is no backtracking.

use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use hyper::body::Body as HttpBody;
use hyper::header::{HeaderValue, CONNECTION, PROXY_AUTHORIZATION};
use hyper::{Method, Request, StatusCode};

use crate::http::health::{self, HealthReport};
use crate::http::response::{self, ProxyResponse};
use crate::http::server::ProxyState;
use crate::http::target::{RelayTarget, TargetError, TunnelTarget};
use crate::http::tunnel;
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::security::Denial;

/// What a request asks the proxy to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// `CONNECT host:port`.
    Tunnel(TunnelTarget),
    /// Any other method with an absolute URL.
    Relay(RelayTarget),
    /// Origin-form `GET /health` or `GET /status`.
    Health,
    /// Origin-form request for anything else; the proxy is not a web server.
    Origin,
    /// Unusable target.
    Malformed(TargetError),
}

impl Classified {
    fn kind(&self) -> &'static str {
        match self {
            Classified::Tunnel(_) => "tunnel",
            Classified::Relay(_) => "relay",
            Classified::Health => "health",
            Classified::Origin | Classified::Malformed(_) => "direct",
        }
    }
}

/// Decide how to handle `request` from its method and target alone.
pub fn classify<B>(request: &Request<B>) -> Classified {
    let uri = request.uri();

    if request.method() == Method::CONNECT {
        return match TunnelTarget::from_uri(uri) {
            Ok(target) => Classified::Tunnel(target),
            Err(e) => Classified::Malformed(e),
        };
    }

    if uri.scheme().is_some() || uri.authority().is_some() {
        return match RelayTarget::from_uri(uri) {
            Ok(target) => Classified::Relay(target),
            Err(e) => Classified::Malformed(e),
        };
    }

    if health::is_health_request(request.method(), uri.path()) {
        Classified::Health
    } else {
        Classified::Origin
    }
}

/// Handle one request from `peer` on connection `id`.
pub async fn handle<B>(state: &ProxyState, peer: SocketAddr, id: ConnectionId, request: Request<B>) -> ProxyResponse
where
    B: HttpBody<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let start = Instant::now();
    let classified = classify(&request);
    let kind = classified.kind();

    let response = match classified {
        Classified::Health => HealthReport {
            started_at: state.started_at,
            connections: &state.connections,
            tunnels: &state.tunnels,
            auth_enabled: state.access.auth_enabled(),
            allowlist_enabled: state.access.allowlist_enabled(),
        }
        .respond(),
        Classified::Origin => {
            tracing::debug!(method = %request.method(), path = %request.uri().path(), "Origin-form request");
            response::not_an_origin()
        }
        Classified::Malformed(e) => {
            tracing::debug!(method = %request.method(), uri = %request.uri(), error = %e, "Malformed proxy target");
            response::status(StatusCode::BAD_REQUEST)
        }
        Classified::Tunnel(target) => match gate(state, peer, &request) {
            Err(denied) => denied,
            Ok(()) => {
                let timeout = state.config.timeouts.request();
                tunnel::establish(target, request, id, &state.tunnels, timeout).await
            }
        },
        Classified::Relay(target) => match gate(state, peer, &request) {
            Err(denied) => denied,
            Ok(()) => match state.relay.forward(&target, request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(upstream = %target, error = %e, "Relay failed");
                    e.into_response()
                }
            },
        },
    };

    metrics::record_request(kind, response.status().as_u16(), start);
    response
}

/// Run access control, turning a denial into the client reply. Denied
/// clients get their connection closed after the reply.
fn gate<B>(state: &ProxyState, peer: SocketAddr, request: &Request<B>) -> Result<(), ProxyResponse> {
    let authorization = request.headers().get(PROXY_AUTHORIZATION);
    state.access.check(peer.ip(), authorization).map_err(|denial| {
        metrics::record_denied(denial.as_str());
        let mut response = match denial {
            Denial::Unauthenticated => response::status_with_header(denial.status(), state.access.challenge()),
            Denial::Forbidden | Denial::LockedOut => response::status(denial.status()),
        };
        response
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
        response
    })
}
