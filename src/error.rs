//! Top-level error type for startup.
//!
//! Only configuration and listener failures reach here; everything that goes
//! wrong while serving is answered to the client and logged.

use thiserror::Error;

use crate::config::ConfigError;
use crate::net::ListenerError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}
