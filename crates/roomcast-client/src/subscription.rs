//! Room subscription controller.
//!
//! A [`RoomSubscription`] keeps one consumer's room joined on a shared
//! [`Connection`] for as long as the subscription is alive:
//!
//! ```text
//!            start                connect                 stop / drop
//! Inactive ─────────▶ Joining ───────────────▶ Active ───────────────▶ Leaving ─▶ Inactive
//!                        ▲                        │
//!                        └────── disconnect ──────┘
//! ```
//!
//! `Disabled` is a separate terminal state for subscriptions that were never
//! armed (disable flag set or no endpoint).
//!
//! The join is best-effort: the subscription counts as active as soon as
//! `subscribe` is queued, without waiting for the relay's `subscribed`.
//!
//! Several subscriptions may share a room on one connection. Each sends its
//! own join, but only the last one to stop sends the leave, since the relay
//! tracks membership per socket.
//!
//! Delivery is scoped by event name only. Two subscriptions with the same event
//! name on one connection see each other's payloads; consumers that share event
//! names across rooms should check [`RoomPayload::room`].

use crate::config::Diagnostics;
use crate::connection::{Connection, ListenerId};
use parking_lot::Mutex;
use roomcast_protocol::{events, RoomPayload};
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Not subscribed.
    Inactive,
    /// Waiting for the connection to come up.
    Joining,
    /// `subscribe` sent on the current connection.
    Active,
    /// Sending `unsubscribe`.
    Leaving,
    /// Never armed; nothing is sent or delivered.
    Disabled,
}

type PayloadSink = Box<dyn Fn(RoomPayload) + Send + Sync>;

struct Shared {
    room: String,
    event: String,
    diagnostics: Diagnostics,
    state: Mutex<SubscriptionState>,
    on_payload: PayloadSink,
}

impl Shared {
    /// Join if this subscription is waiting for a connection.
    fn on_connect(&self, connection: &Connection) {
        let mut state = self.state.lock();
        if *state != SubscriptionState::Joining {
            return;
        }

        match connection.join_room(&self.room) {
            Ok(_) => {
                *state = SubscriptionState::Active;
                if self.diagnostics.enabled() {
                    debug!(room = %self.room, event = %self.event, "Subscribed to room");
                }
            }
            Err(e) => {
                trace!(room = %self.room, error = %e, "Join deferred until next connect");
            }
        }
    }

    /// Membership is lost with the socket; re-arm for the next connect.
    fn on_disconnect(&self) {
        let mut state = self.state.lock();
        if *state == SubscriptionState::Active {
            *state = SubscriptionState::Joining;
            if self.diagnostics.enabled() {
                debug!(room = %self.room, "Connection dropped; will rejoin room");
            }
        }
    }

    fn on_event(&self, data: &Value) {
        if *self.state.lock() != SubscriptionState::Active {
            return;
        }

        let payload = match RoomPayload::<Value>::deserialize(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(room = %self.room, event = %self.event, error = %e, "Malformed room payload");
                return;
            }
        };

        if self.diagnostics.enabled() {
            debug!(
                room = %self.room,
                event = %self.event,
                payload_room = %payload.room,
                "Event received"
            );
        }
        (self.on_payload)(payload);
    }
}

/// Handle to a room subscription.
///
/// Dropping the handle stops the subscription.
pub struct RoomSubscription {
    shared: Arc<Shared>,
    connection: Option<Arc<Connection>>,
    listeners: Vec<(&'static str, ListenerId)>,
    event_listener: Option<ListenerId>,
}

impl RoomSubscription {
    /// Start listening for `event` in `room` on a shared connection.
    ///
    /// Joins immediately if the connection is up, otherwise on the next
    /// connect, and again after every reconnect.
    pub fn start<F>(
        connection: &Arc<Connection>,
        room: impl Into<String>,
        event: impl Into<String>,
        diagnostics: Diagnostics,
        on_payload: F,
    ) -> Self
    where
        F: Fn(RoomPayload) + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            room: room.into(),
            event: event.into(),
            diagnostics,
            state: Mutex::new(SubscriptionState::Joining),
            on_payload: Box::new(on_payload),
        });

        let weak_conn: Weak<Connection> = Arc::downgrade(connection);

        let connect_id = {
            let shared = Arc::clone(&shared);
            let weak_conn = weak_conn.clone();
            connection.on(events::CONNECT, move |_| {
                if let Some(conn) = weak_conn.upgrade() {
                    shared.on_connect(&conn);
                }
            })
        };

        let disconnect_id = {
            let shared = Arc::clone(&shared);
            connection.on(events::DISCONNECT, move |_| shared.on_disconnect())
        };

        let event_id = {
            let event = shared.event.clone();
            let shared = Arc::clone(&shared);
            connection.on(&event, move |data| shared.on_event(data))
        };

        if connection.is_connected() {
            shared.on_connect(connection);
        }

        Self {
            shared,
            connection: Some(Arc::clone(connection)),
            listeners: vec![
                (events::CONNECT, connect_id),
                (events::DISCONNECT, disconnect_id),
            ],
            event_listener: Some(event_id),
        }
    }

    /// A subscription that does nothing.
    ///
    /// Used when the consumer is disabled or no endpoint is resolvable.
    #[must_use]
    pub fn disabled(room: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                room: room.into(),
                event: event.into(),
                diagnostics: Diagnostics::Quiet,
                state: Mutex::new(SubscriptionState::Disabled),
                on_payload: Box::new(|_| {}),
            }),
            connection: None,
            listeners: Vec::new(),
            event_listener: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.shared.state.lock()
    }

    /// Room this subscription targets.
    #[must_use]
    pub fn room(&self) -> &str {
        &self.shared.room
    }

    /// Event name this subscription listens for.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.shared.event
    }

    /// The shared connection, if the subscription is armed.
    #[must_use]
    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.connection.as_ref()
    }

    /// Stop the subscription.
    ///
    /// Sends `unsubscribe` only if a join was sent on the current connection,
    /// and never touches the connection itself. Idempotent.
    pub fn stop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        if let Some(id) = self.event_listener.take() {
            connection.off(&self.shared.event, id);
        }
        for (event, id) in self.listeners.drain(..) {
            connection.off(event, id);
        }

        let mut state = self.shared.state.lock();
        if *state == SubscriptionState::Active {
            *state = SubscriptionState::Leaving;
            match connection.leave_room(&self.shared.room) {
                Ok(true) => {
                    if self.shared.diagnostics.enabled() {
                        debug!(room = %self.shared.room, "Unsubscribed from room");
                    }
                }
                Ok(false) => {
                    trace!(room = %self.shared.room, "Room still in use on this socket; not leaving");
                }
                Err(e) => {
                    trace!(room = %self.shared.room, error = %e, "Leave not sent");
                }
            }
        }
        *state = SubscriptionState::Inactive;
    }
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RoomSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSubscription")
            .field("room", &self.shared.room)
            .field("event", &self.shared.event)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Link;
    use crate::endpoint::Endpoint;
    use roomcast_protocol::Envelope;
    use serde_json::json;

    fn connection() -> (Arc<Connection>, Link) {
        Connection::new(Endpoint::parse("http://localhost:3000").unwrap())
    }

    fn drain(link: &mut Link) -> Vec<Envelope> {
        std::iter::from_fn(|| link.try_next_outbound()).collect()
    }

    fn collector() -> (Arc<Mutex<Vec<RoomPayload>>>, impl Fn(RoomPayload) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |p| sink.lock().push(p))
    }

    fn room_event(room: &str, event: &str, data: Value) -> Envelope {
        Envelope::with_payload(event, &RoomPayload::now(room, data)).unwrap()
    }

    #[test]
    fn test_joins_immediately_when_connected() {
        let (conn, mut link) = connection();
        link.connected();

        let (_seen, sink) = collector();
        let sub = RoomSubscription::start(&conn, "orders", "order-updated", Diagnostics::Enabled, sink);

        assert_eq!(sub.state(), SubscriptionState::Active);
        assert_eq!(drain(&mut link), vec![Envelope::subscribe("orders")]);
    }

    #[test]
    fn test_waits_for_connect() {
        let (conn, mut link) = connection();
        let (_seen, sink) = collector();
        let sub = RoomSubscription::start(&conn, "orders", "order-updated", Diagnostics::Quiet, sink);

        assert_eq!(sub.state(), SubscriptionState::Joining);
        assert!(drain(&mut link).is_empty());

        link.connected();
        assert_eq!(sub.state(), SubscriptionState::Active);
        assert_eq!(drain(&mut link), vec![Envelope::subscribe("orders")]);
    }

    #[test]
    fn test_rejoins_exactly_once_after_reconnect() {
        let (conn, mut link) = connection();
        link.connected();
        let (seen, sink) = collector();
        let sub = RoomSubscription::start(&conn, "orders", "order-updated", Diagnostics::Quiet, sink);
        drain(&mut link);

        link.disconnected();
        assert_eq!(sub.state(), SubscriptionState::Joining);

        link.connected();
        assert_eq!(sub.state(), SubscriptionState::Active);
        assert_eq!(drain(&mut link), vec![Envelope::subscribe("orders")]);

        // Delivery resumes without re-registering
        link.deliver(&room_event("orders", "order-updated", json!({"id": 7})));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].data, json!({"id": 7}));
    }

    #[test]
    fn test_delivers_verbatim_while_active() {
        let (conn, mut link) = connection();
        link.connected();
        let (seen, sink) = collector();
        let _sub = RoomSubscription::start(&conn, "orders", "order-updated", Diagnostics::Quiet, sink);

        let envelope = room_event("orders", "order-updated", json!({"id": 1}));
        link.deliver(&envelope);
        link.deliver(&room_event("orders", "other-event", json!({"id": 2})));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let expected: RoomPayload = envelope.decode_data().unwrap();
        assert_eq!(seen[0], expected);
    }

    #[test]
    fn test_delivers_payload_without_data() {
        let (conn, mut link) = connection();
        link.connected();
        let (seen, sink) = collector();
        let _sub = RoomSubscription::start(&conn, "orders", "order-updated", Diagnostics::Quiet, sink);

        link.deliver(&Envelope::new(
            "order-updated",
            json!({"room": "orders", "timestamp": "2024-01-01T00:00:00.000Z"}),
        ));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].room, "orders");
        assert_eq!(seen[0].data, Value::Null);
        drop(seen);
        drain(&mut link);
    }

    #[test]
    fn test_no_delivery_while_joining() {
        let (conn, link) = connection();
        let (seen, sink) = collector();
        let _sub = RoomSubscription::start(&conn, "orders", "order-updated", Diagnostics::Quiet, sink);

        link.deliver(&room_event("orders", "order-updated", json!(1)));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_malformed_payload_is_skipped() {
        let (conn, mut link) = connection();
        link.connected();
        let (seen, sink) = collector();
        let _sub = RoomSubscription::start(&conn, "orders", "order-updated", Diagnostics::Quiet, sink);

        link.deliver(&Envelope::new("order-updated", json!("just a string")));
        assert!(seen.lock().is_empty());
        drain(&mut link);
    }

    #[test]
    fn test_stop_leaves_once_and_stops_delivery() {
        let (conn, mut link) = connection();
        link.connected();
        let (seen, sink) = collector();
        let mut sub = RoomSubscription::start(&conn, "orders", "order-updated", Diagnostics::Quiet, sink);
        drain(&mut link);

        sub.stop();
        sub.stop();
        assert_eq!(sub.state(), SubscriptionState::Inactive);
        assert_eq!(drain(&mut link), vec![Envelope::unsubscribe("orders")]);

        link.deliver(&room_event("orders", "order-updated", json!(1)));
        assert!(seen.lock().is_empty());
        assert_eq!(conn.listener_count("order-updated"), 0);
        assert_eq!(conn.listener_count("connect"), 0);
        assert_eq!(conn.listener_count("disconnect"), 0);

        // The shared connection is untouched
        assert!(conn.is_connected());
        assert!(!conn.is_closed());
    }

    #[test]
    fn test_stop_while_disconnected_sends_nothing() {
        let (conn, mut link) = connection();
        link.connected();
        let (_seen, sink) = collector();
        let mut sub = RoomSubscription::start(&conn, "orders", "order-updated", Diagnostics::Quiet, sink);
        link.disconnected();

        sub.stop();
        link.connected();
        assert!(drain(&mut link).is_empty());
    }

    #[test]
    fn test_drop_stops() {
        let (conn, mut link) = connection();
        link.connected();
        {
            let (_seen, sink) = collector();
            let _sub =
                RoomSubscription::start(&conn, "orders", "order-updated", Diagnostics::Quiet, sink);
        }
        assert_eq!(
            drain(&mut link),
            vec![Envelope::subscribe("orders"), Envelope::unsubscribe("orders")]
        );
    }

    #[test]
    fn test_other_consumer_unaffected_by_stop() {
        let (conn, mut link) = connection();
        link.connected();
        let (seen_a, sink_a) = collector();
        let (seen_b, sink_b) = collector();
        let mut a = RoomSubscription::start(&conn, "orders", "order-updated", Diagnostics::Quiet, sink_a);
        let b = RoomSubscription::start(&conn, "orders", "order-updated", Diagnostics::Quiet, sink_b);

        a.stop();
        link.deliver(&room_event("orders", "order-updated", json!(1)));

        assert!(seen_a.lock().is_empty());
        assert_eq!(seen_b.lock().len(), 1);

        // B still needs the room, so A's stop must not leave it
        assert_eq!(
            drain(&mut link),
            vec![Envelope::subscribe("orders"), Envelope::subscribe("orders")]
        );
        assert_eq!(conn.active_rooms(), vec!["orders".to_string()]);

        drop(b);
        assert_eq!(drain(&mut link), vec![Envelope::unsubscribe("orders")]);
        assert!(conn.active_rooms().is_empty());
    }

    #[test]
    fn test_reconnect_resets_room_counts() {
        let (conn, mut link) = connection();
        link.connected();
        let (_seen, sink) = collector();
        let mut sub = RoomSubscription::start(&conn, "orders", "order-updated", Diagnostics::Quiet, sink);
        assert_eq!(conn.active_rooms(), vec!["orders".to_string()]);

        link.disconnected();
        assert!(conn.active_rooms().is_empty());

        link.connected();
        assert_eq!(conn.active_rooms(), vec!["orders".to_string()]);
        drain(&mut link);

        sub.stop();
        assert_eq!(drain(&mut link), vec![Envelope::unsubscribe("orders")]);
    }

    #[test]
    fn test_same_event_name_leaks_across_rooms() {
        let (conn, mut link) = connection();
        link.connected();
        let (seen_a, sink_a) = collector();
        let (seen_b, sink_b) = collector();
        let _a = RoomSubscription::start(&conn, "room-a", "update", Diagnostics::Quiet, sink_a);
        let _b = RoomSubscription::start(&conn, "room-b", "update", Diagnostics::Quiet, sink_b);

        link.deliver(&room_event("room-a", "update", json!(1)));

        assert_eq!(seen_a.lock().len(), 1);
        assert_eq!(seen_b.lock().len(), 1);
        assert_eq!(seen_b.lock()[0].room, "room-a");
        drain(&mut link);
    }

    #[test]
    fn test_disabled_does_nothing() {
        let mut sub = RoomSubscription::disabled("orders", "order-updated");
        assert_eq!(sub.state(), SubscriptionState::Disabled);
        assert!(sub.connection().is_none());
        sub.stop();
        assert_eq!(sub.state(), SubscriptionState::Disabled);
    }

    #[test]
    fn test_closed_connection_stays_joining() {
        let (conn, mut link) = connection();
        link.connected();
        let (_seen, sink) = collector();
        let mut sub = RoomSubscription::start(&conn, "orders", "order-updated", Diagnostics::Quiet, sink);
        drain(&mut link);

        conn.close();
        assert_eq!(sub.state(), SubscriptionState::Joining);

        sub.stop();
        assert!(drain(&mut link).is_empty());
    }
}
