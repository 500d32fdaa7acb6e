//! Endpoint identity.
//!
//! An endpoint is the normalized `scheme://host:port` of a relay. It is the
//! key of the connection registry, so two URLs that differ only in path,
//! credentials, case of scheme/host or an explicit default port share a
//! connection.

use crate::connector::ClientError;
use std::fmt;
use tracing::warn;
use url::Url;

/// Normalized connection target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    secure: bool,
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parse an endpoint from a URL.
    ///
    /// Accepts `http`, `https`, `ws` and `wss`. Path, query, fragment and
    /// userinfo are discarded; a missing port resolves to the scheme default.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse, the scheme is unsupported,
    /// or the host is empty.
    pub fn parse(url: &str) -> Result<Self, ClientError> {
        let url = url.trim();
        let parsed = Url::parse(url)
            .map_err(|e| ClientError::InvalidEndpoint(format!("{url}: {e}")))?;

        let secure = match parsed.scheme() {
            "http" | "ws" => false,
            "https" | "wss" => true,
            other => {
                return Err(ClientError::InvalidEndpoint(format!(
                    "unsupported scheme: {other}"
                )))
            }
        };

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ClientError::InvalidEndpoint(format!("missing host: {url}")))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| ClientError::InvalidEndpoint(format!("missing port: {url}")))?;

        Ok(Self {
            secure,
            host: host.to_string(),
            port,
        })
    }

    /// Resolve the endpoint for an API base URL.
    ///
    /// Returns `None` when the URL is absent, blank, or unparseable; callers
    /// treat that as "no resolvable endpoint" and stay disabled.
    #[must_use]
    pub fn from_api_url(api_url: Option<&str>) -> Option<Self> {
        let api_url = api_url.map(str::trim).filter(|u| !u.is_empty())?;
        match Self::parse(api_url) {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                warn!(error = %e, "Ignoring unusable API URL");
                None
            }
        }
    }

    /// Whether the endpoint uses TLS.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, with the scheme default filled in.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host[:port]` part of the endpoint, omitting the scheme default port.
    #[must_use]
    pub fn authority(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// WebSocket URL for the given socket path.
    #[must_use]
    pub fn websocket_url(&self, path: &str) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = path.trim_start_matches('/');
        format!("{scheme}://{}/{path}", self.authority())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{scheme}://{}", self.authority())
    }
}
