//! Access control gates.
//!
//! Gates run in order and stop at the first failure:
//! allowlist → brute-force lockout → credentials.

use std::net::IpAddr;
use std::sync::Arc;

use hyper::header::{HeaderValue, PROXY_AUTHENTICATE};
use hyper::StatusCode;

use crate::config::ProxyConfig;
use crate::security::allowlist::{normalize, Allowlist};
use crate::security::brute_force::{BruteForceLedger, FailureOutcome};
use crate::security::credentials::Credentials;

/// Why a client was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Address not on the allowlist.
    Forbidden,
    /// Address is locked out after repeated failures.
    LockedOut,
    /// Missing or wrong credentials.
    Unauthenticated,
}

impl Denial {
    pub fn status(self) -> StatusCode {
        match self {
            Denial::Forbidden => StatusCode::FORBIDDEN,
            Denial::LockedOut => StatusCode::TOO_MANY_REQUESTS,
            Denial::Unauthenticated => StatusCode::PROXY_AUTHENTICATION_REQUIRED,
        }
    }

    /// Metric/log label.
    pub fn as_str(self) -> &'static str {
        match self {
            Denial::Forbidden => "forbidden",
            Denial::LockedOut => "locked_out",
            Denial::Unauthenticated => "unauthenticated",
        }
    }
}

/// Evaluates the allowlist, lockout and credential gates for a client.
///
/// The ledger is owned here; nothing else mutates it.
#[derive(Debug, Clone)]
pub struct AccessControl {
    allowlist: Allowlist,
    credentials: Option<Credentials>,
    challenge: HeaderValue,
    ledger: Arc<BruteForceLedger>,
}

impl AccessControl {
    pub fn new(config: &ProxyConfig, ledger: Arc<BruteForceLedger>) -> Self {
        let credentials = config
            .auth
            .credentials()
            .map(|(user, pass)| Credentials::new(user, pass));

        // Validation rejects realms containing quotes; fall back rather than fail.
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", config.auth.realm))
            .unwrap_or_else(|_| HeaderValue::from_static("Basic realm=\"proxy\""));

        Self {
            allowlist: Allowlist::from_config(&config.access.allowed_ips),
            credentials,
            challenge,
            ledger,
        }
    }

    pub fn auth_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn allowlist_enabled(&self) -> bool {
        self.allowlist.is_restricted()
    }

    /// `Proxy-Authenticate` value sent with 407 responses.
    pub fn challenge(&self) -> (hyper::header::HeaderName, HeaderValue) {
        (PROXY_AUTHENTICATE, self.challenge.clone())
    }

    pub fn ledger(&self) -> &Arc<BruteForceLedger> {
        &self.ledger
    }

    /// Run all gates for `peer` presenting `authorization` (the raw
    /// `Proxy-Authorization` value, if any).
    pub fn check(&self, peer: IpAddr, authorization: Option<&HeaderValue>) -> Result<(), Denial> {
        let client = normalize(peer);

        if !self.allowlist.permits(peer) {
            tracing::warn!(client = %client, "Client not on allowlist");
            return Err(Denial::Forbidden);
        }

        if !self.ledger.admit(client) {
            tracing::info!(client = %client, "Rejecting locked-out client");
            return Err(Denial::LockedOut);
        }

        let Some(credentials) = &self.credentials else {
            return Ok(());
        };

        if credentials.verify(authorization.map(HeaderValue::as_bytes)) {
            self.ledger.record_success(client);
            return Ok(());
        }

        match self.ledger.record_failure(client) {
            FailureOutcome::Counted { failures } => {
                tracing::info!(
                    client = %client,
                    failures,
                    presented = authorization.is_some(),
                    "Proxy authentication failed"
                );
                Err(Denial::Unauthenticated)
            }
            FailureOutcome::LockedOut { .. } => Err(Denial::LockedOut),
        }
    }
}
