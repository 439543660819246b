//! HTTP proxy subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1, upgrades enabled)
//!     → dispatch.rs (classify target, run access control)
//!     → tunnel.rs (CONNECT: byte splice)
//!       or relay.rs (absolute-form: forward one request)
//!       or health.rs (origin-form /health, /status)
//!     → response.rs (proxy-generated replies)
//! ```

pub mod dispatch;
pub mod health;
pub mod relay;
pub mod response;
pub mod server;
pub mod target;
pub mod tunnel;

pub use relay::{HttpRelay, UpstreamError};
pub use server::{ProxyServer, ProxyState};
pub use target::{RelayTarget, TargetError, TunnelTarget};
