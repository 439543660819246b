//! Forward HTTP/HTTPS proxy library.
//!
//! Accepts `CONNECT host:port` tunnels and absolute-form HTTP requests,
//! gated by an IP allowlist, Basic proxy credentials and a per-address
//! brute-force lockout.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
