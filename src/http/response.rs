//! Responses the proxy produces itself.
//!
//! # Responsibilities
//! - Status-only replies for rejections and tunnel failures
//! - The `200 Connection Established` tunnel reply
//! - Plain-text and JSON bodies for relay errors, health and direct requests

use axum::body::Body;
use hyper::ext::ReasonPhrase;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};

/// Body type for every response the proxy returns.
pub type ProxyResponse = Response<Body>;

/// Status line with an empty body.
pub fn status(status: StatusCode) -> ProxyResponse {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

/// Status line plus one extra header (used for the 407 challenge).
pub fn status_with_header(status: StatusCode, header: (HeaderName, HeaderValue)) -> ProxyResponse {
    let mut response = self::status(status);
    response.headers_mut().insert(header.0, header.1);
    response
}

/// `HTTP/1.1 200 Connection Established`.
pub fn connection_established() -> ProxyResponse {
    let mut response = status(StatusCode::OK);
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(b"Connection Established"));
    response
}

pub fn text(status: StatusCode, body: impl Into<String>) -> ProxyResponse {
    let mut response = Response::new(Body::from(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn json(status: StatusCode, value: &serde_json::Value) -> ProxyResponse {
    let mut response = Response::new(Body::from(value.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Reply to origin-form requests: this listener is a proxy, not a web server.
pub fn not_an_origin() -> ProxyResponse {
    text(
        StatusCode::BAD_REQUEST,
        "This is a forward proxy. Send absolute-form requests \
         (GET http://host/path) or CONNECT host:port.\n",
    )
}
