//! Strict parsing of proxy request targets.
//!
//! `CONNECT` requests carry an authority (`host:port`); every other proxied
//! request carries an absolute URL. Both are parsed into structured values
//! and anything ambiguous (missing host, userinfo, unknown scheme) is
//! rejected instead of guessed at.

use std::fmt;
use std::str::FromStr;

use hyper::http::uri::Authority;
use hyper::Uri;
use thiserror::Error;
use url::Url;

const HTTP_PORT: u16 = 80;
const HTTPS_PORT: u16 = 443;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("missing target host")]
    MissingHost,
    #[error("credentials are not allowed in the target")]
    UserInfo,
    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("invalid port")]
    InvalidPort,
    #[error("malformed target: {0}")]
    Malformed(String),
}

/// `host:port` destination of a CONNECT tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    host: String,
    port: u16,
}

impl TunnelTarget {
    /// Parse a CONNECT authority. The port defaults to 443.
    pub fn parse(authority: &str) -> Result<Self, TargetError> {
        if authority.contains('@') {
            return Err(TargetError::UserInfo);
        }
        let parsed = Authority::from_str(authority)
            .map_err(|e| TargetError::Malformed(e.to_string()))?;
        Self::from_authority(&parsed)
    }

    pub fn from_uri(uri: &Uri) -> Result<Self, TargetError> {
        match uri.authority() {
            Some(authority) => Self::parse(authority.as_str()),
            None => Err(TargetError::MissingHost),
        }
    }

    fn from_authority(authority: &Authority) -> Result<Self, TargetError> {
        let host = authority.host();
        if host.is_empty() || host == "[]" {
            return Err(TargetError::MissingHost);
        }
        // Userinfo is rejected earlier, so anything past the host is the port.
        let has_port = authority.as_str().len() > host.len();
        let port = match authority.port_u16() {
            Some(port) => port,
            None if has_port => return Err(TargetError::InvalidPort),
            None => HTTPS_PORT,
        };
        if port == 0 {
            return Err(TargetError::InvalidPort);
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Host as written, IPv6 literals keep their brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address string for `TcpStream::connect`.
    pub fn connect_addr(&self) -> (String, u16) {
        let host = self
            .host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host);
        (host.to_string(), self.port)
    }
}

impl fmt::Display for TunnelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Scheme used for the upstream leg of a relayed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    fn default_port(self) -> u16 {
        match self {
            Scheme::Http => HTTP_PORT,
            Scheme::Https => HTTPS_PORT,
        }
    }
}

/// Absolute-URL destination of a relayed request.
///
/// The URL is validated with a strict parser, but the path and query are
/// kept exactly as the client sent them: no dot-segment removal, no
/// re-encoding. Signed URLs must reach the upstream byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    scheme: Scheme,
    host: String,
    port: u16,
    path_and_query: String,
}

impl RelayTarget {
    /// Parse an absolute-form request target.
    ///
    /// Port 443 is always relayed over TLS, even when the URL says `http`,
    /// so a malformed URL cannot downgrade traffic to plaintext.
    pub fn parse(target: &str) -> Result<Self, TargetError> {
        let uri = Uri::from_str(target).map_err(|e| TargetError::Malformed(e.to_string()))?;
        Self::from_uri(&uri)
    }

    pub fn from_uri(uri: &Uri) -> Result<Self, TargetError> {
        let url = Url::parse(&uri.to_string()).map_err(|e| match e {
            url::ParseError::EmptyHost => TargetError::MissingHost,
            url::ParseError::InvalidPort => TargetError::InvalidPort,
            other => TargetError::Malformed(other.to_string()),
        })?;

        let stated = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(TargetError::UnsupportedScheme(other.to_string())),
        };
        if !url.username().is_empty() || url.password().is_some() {
            return Err(TargetError::UserInfo);
        }
        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => return Err(TargetError::MissingHost),
        };

        let port = url.port().unwrap_or_else(|| stated.default_port());
        if port == 0 {
            return Err(TargetError::InvalidPort);
        }
        let scheme = if port == HTTPS_PORT { Scheme::Https } else { stated };

        let raw = uri.path_and_query().map_or("", |pq| pq.as_str());
        let path_and_query = if raw.starts_with('/') {
            raw.to_string()
        } else {
            format!("/{}", raw)
        };

        Ok(Self {
            scheme,
            host,
            port,
            path_and_query,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path and query exactly as received.
    pub fn path_and_query(&self) -> &str {
        &self.path_and_query
    }

    pub fn path(&self) -> &str {
        self.path_and_query
            .split_once('?')
            .map_or(self.path_and_query.as_str(), |(path, _)| path)
    }

    pub fn query(&self) -> Option<&str> {
        self.path_and_query.split_once('?').map(|(_, query)| query)
    }

    /// Value for the outbound `Host` header; the port is omitted when it is
    /// the scheme default.
    pub fn host_header(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// URI the upstream request is sent to.
    pub fn upstream_uri(&self) -> Result<Uri, TargetError> {
        Uri::builder()
            .scheme(self.scheme.as_str())
            .authority(format!("{}:{}", self.host, self.port))
            .path_and_query(self.path_and_query.as_str())
            .build()
            .map_err(|e| TargetError::Malformed(e.to_string()))
    }
}

impl fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme.as_str(), self.host_header(), self.path())
    }
}
