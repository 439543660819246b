//! HTTP relay for absolute-form proxy requests.
//!
//! # Responsibilities
//! - Strip proxy-only headers and rebuild `Host` from the target
//! - Stream the client body upstream and the upstream response back
//! - Bound the wait for the upstream response head by the request timeout
//! - Map upstream failures to 502/504
//!
//! # Design Decisions
//! - Never retries: a relayed POST must not be sent twice
//! - Never follows redirects or decodes bodies; the client sees what the upstream sent
//! - Dropping the relay future (client went away) drops the upstream request

use std::time::{Duration, Instant};

use axum::body::Body;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body as HttpBody;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST, PROXY_AUTHORIZATION};
use hyper::{Request, StatusCode, Version};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::{self, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

use crate::http::response::{self, ProxyResponse};
use crate::http::target::RelayTarget;

/// Headers that only make sense between the client and this proxy.
static PROXY_ONLY_HEADERS: [HeaderName; 3] = [
    PROXY_AUTHORIZATION,
    HeaderName::from_static("proxy-connection"),
    CONNECTION,
];

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure on the upstream leg before response headers reached the client.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream did not respond within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("could not connect to upstream: {0}")]
    Connect(#[source] legacy::Error),

    #[error("upstream request failed: {0}")]
    Request(#[source] legacy::Error),

    #[error("could not build upstream request: {0}")]
    Build(String),
}

impl UpstreamError {
    pub fn status(&self) -> StatusCode {
        match self {
            UpstreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    fn from_client(e: legacy::Error) -> Self {
        if e.is_connect() {
            UpstreamError::Connect(e)
        } else {
            UpstreamError::Request(e)
        }
    }

    /// Client-facing reply: status plus a one-line summary.
    pub fn into_response(self) -> ProxyResponse {
        let status = self.status();
        let reason = status.canonical_reason().unwrap_or("Error");
        response::text(status, format!("{}: {}\n", reason, self))
    }
}

/// Remove proxy-only headers and set `Host` for `target`.
pub fn outbound_headers(mut headers: HeaderMap, target: &RelayTarget) -> Result<HeaderMap, UpstreamError> {
    for name in &PROXY_ONLY_HEADERS {
        headers.remove(name);
    }
    let host = HeaderValue::from_str(&target.host_header())
        .map_err(|e| UpstreamError::Build(e.to_string()))?;
    headers.insert(HOST, host);
    Ok(headers)
}

/// Forwards single requests to arbitrary upstreams.
///
/// The request line carries the client's path and query untouched; the
/// client is built on hyper directly because URL-based clients normalize
/// both before sending.
#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    timeout: Duration,
}

impl HttpRelay {
    pub fn new(timeout: Duration) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(timeout));
        http.set_nodelay(true);

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .retry_canceled_requests(false)
            .build(https);
        Self { client, timeout }
    }

    /// Relay `request` to `target` and return the upstream response with a
    /// streaming body.
    pub async fn forward<B>(&self, target: &RelayTarget, request: Request<B>) -> Result<ProxyResponse, UpstreamError>
    where
        B: HttpBody<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let start = Instant::now();
        let (mut parts, body) = request.into_parts();
        let method = parts.method.clone();

        parts.headers = outbound_headers(parts.headers, target)?;
        parts.uri = target
            .upstream_uri()
            .map_err(|e| UpstreamError::Build(e.to_string()))?;
        parts.version = Version::HTTP_11;
        let outbound = Request::from_parts(parts, Body::new(body));

        let upstream = match tokio::time::timeout(self.timeout, self.client.request(outbound)).await {
            Ok(Ok(upstream)) => upstream,
            Ok(Err(e)) => return Err(UpstreamError::from_client(e)),
            Err(_) => return Err(UpstreamError::Timeout(self.timeout)),
        };

        tracing::info!(
            method = %method,
            upstream = %target,
            status = upstream.status().as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Relayed request"
        );

        Ok(upstream.map(|body| {
            Body::new(body.map_err(|e| {
                tracing::debug!(error = %e, "Upstream body failed after headers were sent");
                e
            }))
        }))
    }
}
