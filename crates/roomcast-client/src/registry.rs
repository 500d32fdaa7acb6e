//! Connection registry.
//!
//! The registry maps each [`Endpoint`] to exactly one live [`Connection`].
//! Connections are created on first use and live until [`Registry::release_all`];
//! they are not reference counted, so a connection stays up after its last
//! consumer stops.

use crate::connection::Connection;
use crate::connector::Connector;
use crate::endpoint::Endpoint;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Process-scoped connection registry.
pub struct Registry {
    connections: DashMap<Endpoint, Arc<Connection>>,
    connector: Arc<dyn Connector>,
}

impl Registry {
    /// Create a registry that opens connections with `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        info!(connector = connector.name(), "Creating connection registry");
        Self {
            connections: DashMap::new(),
            connector,
        }
    }

    /// Get the connection for an endpoint, creating it on first use.
    pub fn acquire(&self, endpoint: &Endpoint) -> Arc<Connection> {
        let entry = self.connections.entry(endpoint.clone()).or_insert_with(|| {
            debug!(endpoint = %endpoint, "Opening shared connection");
            let (connection, link) = Connection::new(endpoint.clone());
            self.connector.open(link);
            connection
        });
        Arc::clone(entry.value())
    }

    /// Get the connection for an endpoint without creating one.
    #[must_use]
    pub fn get(&self, endpoint: &Endpoint) -> Option<Arc<Connection>> {
        self.connections.get(endpoint).map(|c| Arc::clone(c.value()))
    }

    /// Observe connectivity of an endpoint's connection, creating it on first use.
    pub fn connectivity(&self, endpoint: &Endpoint) -> watch::Receiver<bool> {
        self.acquire(endpoint).connectivity()
    }

    /// Disconnect and discard every connection.
    ///
    /// Returns the number of connections released. Later calls to
    /// [`acquire`](Self::acquire) open brand-new connections.
    pub fn release_all(&self) -> usize {
        let mut released = Vec::new();
        self.connections.retain(|_, connection| {
            released.push(Arc::clone(connection));
            false
        });

        for connection in &released {
            connection.close();
        }

        info!(count = released.len(), "Released all connections");
        released.len()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("connector", &self.connector.name())
            .field("connections", &self.connections.len())
            .finish()
    }
}
