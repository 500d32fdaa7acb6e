//! Transport seam for Roomcast clients.
//!
//! A [`Connector`] is handed the transport side ([`Link`]) of every new
//! [`Connection`](crate::Connection) and is responsible for driving it: opening
//! the socket, reporting connect/disconnect, delivering inbound envelopes and
//! writing outbound ones.

use crate::connection::Link;
use roomcast_protocol::ProtocolError;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Endpoint URL could not be understood.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The connection was torn down by the registry.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection is currently disconnected.
    #[error("Not connected")]
    NotConnected,

    /// Lifecycle event names cannot be emitted.
    #[error("Event name is reserved: {0}")]
    ReservedEvent(String),

    /// Payload could not be encoded.
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport-level failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Opens and drives connections.
pub trait Connector: Send + Sync {
    /// Take ownership of a new connection's transport side.
    ///
    /// Implementations must not block; long-running work belongs on a task.
    fn open(&self, link: Link);

    /// Get the connector name (e.g., "websocket").
    fn name(&self) -> &'static str;
}

/// A connector that hands every link to a receiver.
///
/// Useful for custom transports driven outside this crate, and for tests.
pub struct ChannelConnector {
    links: mpsc::UnboundedSender<Link>,
}

impl ChannelConnector {
    /// Create a connector and the receiver its links are delivered to.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Link>) {
        let (links, rx) = mpsc::unbounded_channel();
        (Self { links }, rx)
    }
}

impl Connector for ChannelConnector {
    fn open(&self, link: Link) {
        if self.links.send(link).is_err() {
            warn!("Link receiver dropped; connection will stay disconnected");
        }
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::endpoint::Endpoint;

    #[test]
    fn test_channel_connector_forwards_links() {
        let (connector, mut links) = ChannelConnector::new();
        let endpoint = Endpoint::parse("http://localhost:3000").unwrap();
        let (conn, link) = Connection::new(endpoint.clone());

        connector.open(link);

        let received = links.try_recv().unwrap();
        assert!(std::sync::Arc::ptr_eq(received.connection(), &conn));
        assert_eq!(connector.name(), "channel");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ClientError::NotConnected.to_string(), "Not connected");
        assert_eq!(
            ClientError::ReservedEvent("connect".into()).to_string(),
            "Event name is reserved: connect"
        );
    }
}
