//! Client configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (`ROOMCAST_API_URL`, `ROOMCAST_ENV`)
//! - Any serde source, e.g. an embedding application's own config file

use crate::endpoint::Endpoint;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment tag that silences per-subscription diagnostics.
pub const PRODUCTION: &str = "production";

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the relay's API. Everything after `scheme://host:port` is ignored.
    #[serde(default = "default_api_url")]
    pub api_url: Option<String>,

    /// Environment tag. Only affects diagnostic logging.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Path of the relay's WebSocket endpoint.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Reconnection policy.
    #[serde(default)]
    pub reconnection: ReconnectPolicy,
}

/// Automatic reconnection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Reconnect after a drop or a failed connect.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Retries after a failed connect before giving up. A successful connect
    /// resets the count.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

/// Whether subscription lifecycle events are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostics {
    /// Log subscribe, delivery and unsubscribe at `debug`.
    Enabled,
    /// Log nothing per subscription (production).
    Quiet,
}

impl Diagnostics {
    /// Whether per-subscription events should be logged.
    #[must_use]
    pub fn enabled(self) -> bool {
        self == Diagnostics::Enabled
    }
}

fn default_api_url() -> Option<String> {
    std::env::var("ROOMCAST_API_URL")
        .ok()
        .filter(|u| !u.trim().is_empty())
}

fn default_environment() -> String {
    std::env::var("ROOMCAST_ENV").unwrap_or_else(|_| "development".to_string())
}

fn default_socket_path() -> String {
    "/ws".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delay_ms() -> u64 {
    1000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            environment: default_environment(),
            socket_path: default_socket_path(),
            reconnection: ReconnectPolicy::default(),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl ClientConfig {
    /// Load configuration from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Configuration for a fixed API URL, ignoring the environment.
    #[must_use]
    pub fn for_url(api_url: impl Into<String>) -> Self {
        Self {
            api_url: Some(api_url.into()),
            environment: "development".to_string(),
            socket_path: default_socket_path(),
            reconnection: ReconnectPolicy::default(),
        }
    }

    /// Resolve the endpoint, if any.
    #[must_use]
    pub fn endpoint(&self) -> Option<Endpoint> {
        Endpoint::from_api_url(self.api_url.as_deref())
    }

    /// Whether this is a production environment.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case(PRODUCTION)
    }

    /// Diagnostics mode for this environment.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        if self.is_production() {
            Diagnostics::Quiet
        } else {
            Diagnostics::Enabled
        }
    }
}
