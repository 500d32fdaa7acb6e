//! Consumer bindings.
//!
//! A [`RoomBinding`] is owned by exactly one consumer. It turns the payloads
//! of one (room, event) subscription into a local value the consumer can read
//! or await, and re-arms the subscription whenever its parameters or endpoint
//! change.

use crate::config::Diagnostics;
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::registry::Registry;
use crate::subscription::{RoomSubscription, SubscriptionState};
use roomcast_protocol::RoomPayload;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

/// Parameters a binding is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingParams {
    /// Room to join.
    pub room: String,
    /// Event name whose payloads are delivered.
    pub event: String,
    /// Keep the binding inert: no connection, no join, no delivery.
    pub disable: bool,
}

impl BindingParams {
    /// Enabled parameters for `event` in `room`.
    #[must_use]
    pub fn new(room: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            event: event.into(),
            disable: false,
        }
    }

    /// Set the disable flag.
    #[must_use]
    pub fn disabled(mut self, disable: bool) -> Self {
        self.disable = disable;
        self
    }
}

/// One consumer's binding of a room event to a local value.
///
/// The delivery target holds the latest payload decoded as `T`; it starts
/// out as `None`. Dropping the binding leaves the room.
pub struct RoomBinding<T> {
    registry: Arc<Registry>,
    endpoint: Option<Endpoint>,
    diagnostics: Diagnostics,
    params: BindingParams,
    target: Arc<watch::Sender<Option<RoomPayload<T>>>>,
    subscription: RoomSubscription,
}

impl<T> RoomBinding<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Bind `params` on the registry's connection for `endpoint`.
    ///
    /// A missing endpoint or a set disable flag yields a disabled binding
    /// that never touches the registry.
    pub fn bind(
        registry: Arc<Registry>,
        endpoint: Option<Endpoint>,
        diagnostics: Diagnostics,
        params: BindingParams,
    ) -> Self {
        let (target, _) = watch::channel(None);
        let target = Arc::new(target);
        let subscription = arm(&registry, endpoint.as_ref(), diagnostics, &params, &target);

        Self {
            registry,
            endpoint,
            diagnostics,
            params,
            target,
            subscription,
        }
    }

    /// Observe the delivery target.
    #[must_use]
    pub fn target(&self) -> watch::Receiver<Option<RoomPayload<T>>> {
        self.target.subscribe()
    }

    /// Re-evaluate the binding with new parameters.
    ///
    /// Nothing happens when the parameters are unchanged and the connection is
    /// still registered. Otherwise the current subscription is fully stopped
    /// before the new one starts.
    pub fn update(&mut self, params: BindingParams) {
        if params == self.params && !self.is_stale() {
            return;
        }
        self.params = params;
        self.rearm();
    }

    /// Re-evaluate the binding against a new endpoint.
    pub fn set_endpoint(&mut self, endpoint: Option<Endpoint>) {
        if endpoint == self.endpoint && !self.is_stale() {
            return;
        }
        self.endpoint = endpoint;
        self.rearm();
    }

    /// Current parameters.
    #[must_use]
    pub fn params(&self) -> &BindingParams {
        &self.params
    }

    /// The shared connection, for emitting arbitrary events.
    ///
    /// The registry keeps ownership; `None` while the binding is disabled.
    #[must_use]
    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.subscription.connection()
    }

    /// State of the underlying room subscription.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.subscription.state()
    }

    /// Leave the room. The binding stays inert until the next
    /// [`update`](Self::update).
    pub fn stop(&mut self) {
        self.subscription.stop();
    }

    /// The subscription's connection was discarded by the registry.
    fn is_stale(&self) -> bool {
        self.subscription
            .connection()
            .is_some_and(|connection| connection.is_closed())
    }

    fn rearm(&mut self) {
        self.subscription.stop();
        self.subscription = arm(
            &self.registry,
            self.endpoint.as_ref(),
            self.diagnostics,
            &self.params,
            &self.target,
        );
    }
}

impl<T> std::fmt::Debug for RoomBinding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomBinding")
            .field("endpoint", &self.endpoint)
            .field("params", &self.params)
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

fn arm<T>(
    registry: &Registry,
    endpoint: Option<&Endpoint>,
    diagnostics: Diagnostics,
    params: &BindingParams,
    target: &Arc<watch::Sender<Option<RoomPayload<T>>>>,
) -> RoomSubscription
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let endpoint = match endpoint {
        Some(endpoint) if !params.disable => endpoint,
        _ => return RoomSubscription::disabled(params.room.as_str(), params.event.as_str()),
    };

    let connection = registry.acquire(endpoint);
    let target = Arc::clone(target);

    RoomSubscription::start(
        &connection,
        params.room.as_str(),
        params.event.as_str(),
        diagnostics,
        move |payload| {
            let RoomPayload {
                room,
                data,
                timestamp,
            } = payload;
            match serde_json::from_value::<T>(data) {
                Ok(data) => {
                    target.send_replace(Some(RoomPayload {
                        room,
                        data,
                        timestamp,
                    }));
                }
                Err(e) => warn!(room = %room, error = %e, "Payload data does not match binding type"),
            }
        },
    )
}

/// Observes whether a shared connection is up.
///
/// A watcher created without an endpoint, or while disabled, always reports
/// disconnected.
#[derive(Debug, Clone)]
pub struct ConnectivityWatcher {
    rx: Option<watch::Receiver<bool>>,
}

impl ConnectivityWatcher {
    pub(crate) fn new(rx: Option<watch::Receiver<bool>>) -> Self {
        Self { rx }
    }

    /// A watcher that never connects.
    #[must_use]
    pub fn disabled() -> Self {
        Self { rx: None }
    }

    /// Current connectivity.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Wait for the next change and return the new state.
    ///
    /// Pends forever on a disabled watcher.
    pub async fn changed(&mut self) -> bool {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending::<bool>().await;
        };
        match rx.changed().await {
            Ok(()) => *rx.borrow_and_update(),
            Err(_) => {
                self.rx = None;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Link;
    use crate::connector::ChannelConnector;
    use roomcast_protocol::Envelope;
    use serde::Deserialize;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Order {
        id: u32,
    }

    fn setup() -> (Arc<Registry>, mpsc::UnboundedReceiver<Link>, Endpoint) {
        let (connector, links) = ChannelConnector::new();
        let registry = Arc::new(Registry::new(Arc::new(connector)));
        let endpoint = Endpoint::parse("http://localhost:3000").unwrap();
        (registry, links, endpoint)
    }

    fn drain(link: &mut Link) -> Vec<Envelope> {
        std::iter::from_fn(|| link.try_next_outbound()).collect()
    }

    fn orders() -> BindingParams {
        BindingParams::new("orders", "order-updated")
    }

    #[test]
    fn test_bind_decodes_into_target() {
        let (registry, mut links, endpoint) = setup();
        let binding: RoomBinding<Order> =
            RoomBinding::bind(registry, Some(endpoint), Diagnostics::Quiet, orders());
        let mut link = links.try_recv().unwrap();
        link.connected();
        assert_eq!(drain(&mut link), vec![Envelope::subscribe("orders")]);

        let target = binding.target();
        assert!(target.borrow().is_none());

        let envelope =
            Envelope::with_payload("order-updated", &RoomPayload::now("orders", json!({"id": 1})))
                .unwrap();
        link.deliver(&envelope);

        let latest = target.borrow().clone().unwrap();
        assert_eq!(latest.room, "orders");
        assert_eq!(latest.data, Order { id: 1 });
        assert!(!latest.timestamp.is_empty());
    }

    #[test]
    fn test_mismatched_data_keeps_previous_value() {
        let (registry, mut links, endpoint) = setup();
        let binding: RoomBinding<Order> =
            RoomBinding::bind(registry, Some(endpoint), Diagnostics::Quiet, orders());
        let link = links.try_recv().unwrap();
        link.connected();

        let good = RoomPayload::now("orders", json!({"id": 3}));
        let bad = RoomPayload::now("orders", json!("nope"));
        link.deliver(&Envelope::with_payload("order-updated", &good).unwrap());
        link.deliver(&Envelope::with_payload("order-updated", &bad).unwrap());

        assert_eq!(binding.target().borrow().as_ref().unwrap().data, Order { id: 3 });
    }

    #[test]
    fn test_no_endpoint_is_disabled() {
        let (registry, mut links, _) = setup();
        let binding: RoomBinding<Order> =
            RoomBinding::bind(Arc::clone(&registry), None, Diagnostics::Quiet, orders());

        assert_eq!(binding.state(), SubscriptionState::Disabled);
        assert!(binding.connection().is_none());
        assert!(registry.is_empty());
        assert!(links.try_recv().is_err());
    }

    #[test]
    fn test_param_change_leaves_before_join() {
        let (registry, mut links, endpoint) = setup();
        let mut binding: RoomBinding<Order> =
            RoomBinding::bind(registry, Some(endpoint), Diagnostics::Quiet, orders());
        let mut link = links.try_recv().unwrap();
        link.connected();
        drain(&mut link);

        binding.update(orders());
        assert!(drain(&mut link).is_empty());

        binding.update(BindingParams::new("invoices", "order-updated"));
        assert_eq!(
            drain(&mut link),
            vec![Envelope::unsubscribe("orders"), Envelope::subscribe("invoices")]
        );
        assert_eq!(link.connection().listener_count("order-updated"), 1);
    }

    #[test]
    fn test_disable_toggle_settles_without_joins() {
        let (registry, mut links, endpoint) = setup();
        let mut binding: RoomBinding<Order> = RoomBinding::bind(
            registry,
            Some(endpoint),
            Diagnostics::Quiet,
            orders().disabled(true),
        );
        assert_eq!(binding.state(), SubscriptionState::Disabled);

        binding.update(orders());
        let mut link = links.try_recv().unwrap();
        binding.update(orders().disabled(true));

        // The join never went out, so there is nothing to leave
        link.connected();
        assert!(drain(&mut link).is_empty());
        assert_eq!(binding.state(), SubscriptionState::Disabled);
        assert_eq!(link.connection().listener_count("order-updated"), 0);
    }

    #[test]
    fn test_stale_connection_is_replaced() {
        let (registry, mut links, endpoint) = setup();
        let mut binding: RoomBinding<Order> = RoomBinding::bind(
            Arc::clone(&registry),
            Some(endpoint),
            Diagnostics::Quiet,
            orders(),
        );
        let old = Arc::clone(binding.connection().unwrap());
        let _old_link = links.try_recv().unwrap();

        registry.release_all();
        binding.update(orders());

        let fresh = binding.connection().unwrap();
        assert!(!Arc::ptr_eq(&old, fresh));
        assert!(!fresh.is_closed());
        assert!(links.try_recv().is_ok());
    }

    #[test]
    fn test_set_endpoint() {
        let (registry, mut links, endpoint) = setup();
        let mut binding: RoomBinding<Order> =
            RoomBinding::bind(Arc::clone(&registry), None, Diagnostics::Quiet, orders());

        binding.set_endpoint(Some(endpoint.clone()));
        assert_eq!(binding.state(), SubscriptionState::Joining);
        assert!(links.try_recv().is_ok());

        binding.set_endpoint(None);
        assert_eq!(binding.state(), SubscriptionState::Disabled);
        // The connection outlives its last consumer
        assert!(registry.get(&endpoint).is_some());
    }

    #[tokio::test]
    async fn test_connectivity_watcher() {
        let (registry, mut links, endpoint) = setup();
        let mut watcher = ConnectivityWatcher::new(Some(registry.connectivity(&endpoint)));
        assert!(!watcher.is_connected());

        let mut link = links.recv().await.unwrap();
        link.connected();
        assert!(watcher.changed().await);
        assert!(watcher.is_connected());

        link.disconnected();
        assert!(!watcher.changed().await);

        let disabled = ConnectivityWatcher::disabled();
        assert!(!disabled.is_connected());
    }
}
