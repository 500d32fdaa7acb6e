//! Client entry point.

use crate::binding::{BindingParams, ConnectivityWatcher, RoomBinding};
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::connector::Connector;
use crate::endpoint::Endpoint;
use crate::registry::Registry;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::info;

/// A process-scoped Roomcast client.
///
/// Owns the connection registry and the resolved endpoint. Create one at
/// startup, hand out bindings from it, and call [`shutdown`](Self::shutdown)
/// on logout or exit.
#[derive(Debug, Clone)]
pub struct Client {
    registry: Arc<Registry>,
    config: Arc<ClientConfig>,
    endpoint: Option<Endpoint>,
}

impl Client {
    /// Create a client that opens connections with `connector`.
    #[must_use]
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let endpoint = config.endpoint();
        match &endpoint {
            Some(endpoint) => info!(endpoint = %endpoint, environment = %config.environment, "Roomcast client ready"),
            None => info!("No relay endpoint configured; subscriptions are disabled"),
        }

        Self {
            registry: Arc::new(Registry::new(connector)),
            config: Arc::new(config),
            endpoint,
        }
    }

    /// Create a client that connects over WebSocket.
    #[cfg(feature = "websocket")]
    #[must_use]
    pub fn websocket(config: ClientConfig) -> Self {
        let connector = crate::websocket::WebSocketConnector::from_config(&config);
        Self::new(config, Arc::new(connector))
    }

    /// Bind `event` in `room` to a new delivery target.
    pub fn bind<T>(&self, room: impl Into<String>, event: impl Into<String>, disable: bool) -> RoomBinding<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.bind_with(BindingParams::new(room, event).disabled(disable))
    }

    /// Bind with explicit parameters.
    pub fn bind_with<T>(&self, params: BindingParams) -> RoomBinding<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        RoomBinding::bind(
            Arc::clone(&self.registry),
            self.endpoint.clone(),
            self.config.diagnostics(),
            params,
        )
    }

    /// Watch connectivity of the shared connection.
    pub fn connectivity(&self, disable: bool) -> ConnectivityWatcher {
        match &self.endpoint {
            Some(endpoint) if !disable => {
                ConnectivityWatcher::new(Some(self.registry.connectivity(endpoint)))
            }
            _ => ConnectivityWatcher::disabled(),
        }
    }

    /// The shared connection, created on first use.
    ///
    /// `None` when no endpoint is configured.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.endpoint
            .as_ref()
            .map(|endpoint| self.registry.acquire(endpoint))
    }

    /// Resolved relay endpoint; `None` when the API URL is absent or unusable.
    #[must_use]
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Configuration this client was built from.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connection registry shared by every binding of this client.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Disconnect and discard every connection.
    ///
    /// Existing bindings re-acquire a fresh connection on their next update.
    pub fn shutdown(&self) -> usize {
        self.registry.release_all()
    }
}
