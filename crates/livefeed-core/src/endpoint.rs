//! Websocket endpoint addresses.
//!
//! Endpoint format: `scheme://host[:port]/path`
//!
//! Supported schemes:
//! - `ws` - Plain websocket
//! - `wss` - Websocket over TLS
//!
//! Per-session endpoints are built from a base address plus one extra path
//! segment naming the file or job whose events the client follows.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An immutable websocket address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
}

impl Endpoint {
    /// Create an endpoint from its parts.
    ///
    /// An empty path becomes `/`; a path without a leading slash gets one.
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: Option<u16>,
        path: impl Into<String>,
    ) -> Result<Self, EndpointParseError> {
        let scheme = scheme.into();
        if scheme != "ws" && scheme != "wss" {
            return Err(EndpointParseError::UnsupportedScheme(scheme));
        }

        let host = host.into();
        if host.is_empty() {
            return Err(EndpointParseError::EmptyHost);
        }

        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };

        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }

    /// Derive the endpoint for one session from a base address.
    ///
    /// `Endpoint::for_session("ws://localhost:8000/ws", "f1")` addresses
    /// `ws://localhost:8000/ws/f1`.
    pub fn for_session(base: &str, session_id: &str) -> Result<Self, EndpointParseError> {
        if session_id.is_empty() {
            return Err(EndpointParseError::EmptySession);
        }
        if session_id.contains(['/', '?', '#']) {
            return Err(EndpointParseError::InvalidSession(session_id.to_string()));
        }

        let base: Endpoint = base.parse()?;
        // The segment goes before any query or fragment.
        let split = base.path.find(['?', '#']).unwrap_or(base.path.len());
        let (prefix, suffix) = base.path.split_at(split);
        let path = if prefix.ends_with('/') {
            format!("{prefix}{session_id}{suffix}")
        } else {
            format!("{prefix}/{session_id}{suffix}")
        };

        Ok(Self { path, ..base })
    }

    /// The scheme ("ws" or "wss").
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The host, without brackets for IPv6 literals.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The explicit port, if any.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The request path, always starting with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the endpoint uses TLS.
    pub fn is_secure(&self) -> bool {
        self.scheme == "wss"
    }

    /// The full URL string handed to the websocket handshake.
    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            write!(f, "{}", self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        write!(f, "{}", self.path)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| EndpointParseError::MissingScheme(s.to_string()))?;

        let (authority, path) = match rest.find(['/', '?', '#']) {
            Some(i) => rest.split_at(i),
            None => (rest, "/"),
        };

        let (host, port) = split_authority(authority)?;
        Self::new(scheme, host, port, path)
    }
}

fn split_authority(authority: &str) -> Result<(&str, Option<u16>), EndpointParseError> {
    // [::1]:8000
    if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| EndpointParseError::InvalidPort(authority.to_string()))?;
        return match after.strip_prefix(':') {
            Some(port) => Ok((host, Some(parse_port(port)?))),
            None if after.is_empty() => Ok((host, None)),
            None => Err(EndpointParseError::InvalidPort(after.to_string())),
        };
    }

    match authority.split_once(':') {
        Some((host, port)) => Ok((host, Some(parse_port(port)?))),
        None => Ok((authority, None)),
    }
}

fn parse_port(port: &str) -> Result<u16, EndpointParseError> {
    port.parse()
        .map_err(|_| EndpointParseError::InvalidPort(port.to_string()))
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

/// Error building an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointParseError {
    #[error("endpoint must contain '://' separator, got: {0}")]
    MissingScheme(String),
    #[error("unsupported endpoint scheme: {0} (expected ws or wss)")]
    UnsupportedScheme(String),
    #[error("endpoint host cannot be empty")]
    EmptyHost,
    #[error("invalid endpoint port: {0}")]
    InvalidPort(String),
    #[error("session identifier cannot be empty")]
    EmptySession,
    #[error("session identifier must be a single path segment, got: {0}")]
    InvalidSession(String),
}
