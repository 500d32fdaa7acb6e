//! Shared client connection.
//!
//! A [`Connection`] is the consumer-facing half of one socket to a relay. It is
//! shared by every consumer targeting the same endpoint: consumers register
//! event listeners, observe connectivity and emit fire-and-forget messages, but
//! never own or close it. Only the registry closes connections.
//!
//! The transport-facing half is the [`Link`], owned by a
//! [`Connector`](crate::Connector). The link reports connect/disconnect,
//! delivers inbound envelopes, and drains the outbound queue.

use crate::connector::ClientError;
use crate::endpoint::Endpoint;
use parking_lot::Mutex;
use roomcast_protocol::{events, Envelope};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

/// Event listener callback.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by [`Connection::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// One shared connection to a relay endpoint.
pub struct Connection {
    endpoint: Endpoint,
    connected: watch::Sender<bool>,
    closed: watch::Sender<bool>,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Listener)>>>,
    next_listener: AtomicU64,
    // Active subscriptions per room on the current socket.
    rooms: Mutex<HashMap<String, usize>>,
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl Connection {
    /// Create a disconnected connection and its transport side.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> (Arc<Self>, Link) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (connected, _) = watch::channel(false);
        let (closed, _) = watch::channel(false);

        let connection = Arc::new(Self {
            endpoint,
            connected,
            closed,
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
            rooms: Mutex::new(HashMap::new()),
            outbound,
        });

        let link = Link {
            connection: Arc::clone(&connection),
            outbound: outbound_rx,
        };

        (connection, link)
    }

    /// Get the endpoint this connection targets.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Check if the transport is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Check if the connection was torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Observe connectivity changes.
    #[must_use]
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Register a listener for an event.
    ///
    /// `connect` and `disconnect` listeners observe transport lifecycle
    /// signals; any other name observes inbound envelopes with that event.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        trace!(endpoint = %self.endpoint, event = %event, "Listener added");
        id
    }

    /// Remove a listener.
    ///
    /// Returns `true` if the listener was registered.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };

        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;

        if list.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Number of listeners registered for an event.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map_or(0, Vec::len)
    }

    /// Emit an event to the relay.
    ///
    /// Sends are fire-and-forget: the envelope is queued for the transport and
    /// this call never waits. Emits while disconnected are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or disconnected, or the
    /// event name is a lifecycle signal.
    pub fn emit(&self, event: &str, data: Value) -> Result<(), ClientError> {
        if events::is_lifecycle(event) {
            return Err(ClientError::ReservedEvent(event.to_string()));
        }
        self.send(Envelope::new(event, data))
    }

    /// Emit an event with a serializable payload.
    ///
    /// # Errors
    ///
    /// Same as [`emit`](Self::emit), plus payload encoding failures.
    pub fn emit_json<T: Serialize>(&self, event: &str, payload: &T) -> Result<(), ClientError> {
        self.emit(event, serde_json::to_value(payload)?)
    }

    pub(crate) fn send(&self, envelope: Envelope) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        if !self.is_connected() {
            trace!(endpoint = %self.endpoint, event = %envelope.event, "Dropping emit while disconnected");
            return Err(ClientError::NotConnected);
        }
        self.outbound
            .send(envelope)
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Send `subscribe` for `room` and count one more active subscription.
    ///
    /// The send and the count happen under the room lock, so a concurrent
    /// disconnect either clears this join or refuses it. Returns the new count.
    pub(crate) fn join_room(&self, room: &str) -> Result<usize, ClientError> {
        let mut rooms = self.rooms.lock();
        self.send(Envelope::subscribe(room))?;
        let count = rooms.entry(room.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    /// Count one fewer active subscription for `room`.
    ///
    /// Sends `unsubscribe` once the last one is gone. Returns `false` when the
    /// room is still in use or was never joined on the current socket.
    pub(crate) fn leave_room(&self, room: &str) -> Result<bool, ClientError> {
        let mut rooms = self.rooms.lock();
        let Some(count) = rooms.get_mut(room) else {
            return Ok(false);
        };
        *count = count.saturating_sub(1);
        if *count > 0 {
            return Ok(false);
        }
        rooms.remove(room);
        self.send(Envelope::unsubscribe(room))?;
        Ok(true)
    }

    /// Rooms with at least one active subscription on the current socket.
    #[must_use]
    pub fn active_rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.rooms.lock().keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Tear down the connection.
    ///
    /// Marks it closed, signals the transport to stop, and raises
    /// `disconnect` if it was connected. Idempotent.
    pub(crate) fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        debug!(endpoint = %self.endpoint, "Closing connection");
        self.mark_disconnected();
    }

    fn mark_connected(&self) {
        if self.is_closed() {
            return;
        }
        if !self.connected.send_replace(true) {
            debug!(endpoint = %self.endpoint, "Connected");
            self.dispatch(events::CONNECT, &Value::Null);
        }
    }

    fn mark_disconnected(&self) {
        let dropped = {
            let mut rooms = self.rooms.lock();
            let was_connected = self.connected.send_replace(false);
            // Relay membership dies with the socket
            rooms.clear();
            was_connected
        };
        if dropped {
            debug!(endpoint = %self.endpoint, "Disconnected");
            self.dispatch(events::DISCONNECT, &Value::Null);
        }
    }

    /// Call every listener for `event`.
    ///
    /// Listeners are cloned out first so they may register or remove
    /// listeners themselves.
    fn dispatch(&self, event: &str, data: &Value) -> usize {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .get(event)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in &listeners {
            listener(data);
        }
        listeners.len()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Transport side of a [`Connection`].
pub struct Link {
    pub(crate) connection: Arc<Connection>,
    pub(crate) outbound: mpsc::UnboundedReceiver<Envelope>,
}

impl Link {
    /// Get the connection this link drives.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Report that the transport is connected.
    ///
    /// Raises `connect` on a disconnected → connected transition only.
    pub fn connected(&self) {
        self.connection.mark_connected();
    }

    /// Report that the transport dropped.
    ///
    /// Raises `disconnect` on a connected → disconnected transition only, and
    /// discards anything still queued for the old socket.
    pub fn disconnected(&mut self) {
        self.connection.mark_disconnected();
        let mut discarded = 0usize;
        while self.outbound.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(endpoint = %self.connection.endpoint, discarded, "Discarded unsent envelopes");
        }
    }

    /// Deliver an inbound envelope to listeners.
    ///
    /// Returns the number of listeners called. Envelopes named like lifecycle
    /// signals are rejected.
    pub fn deliver(&self, envelope: &Envelope) -> usize {
        deliver_inbound(&self.connection, envelope)
    }

    /// Wait for the next envelope to write.
    ///
    /// Returns `None` once the connection is dropped.
    pub async fn next_outbound(&mut self) -> Option<Envelope> {
        self.outbound.recv().await
    }

    /// Take the next envelope to write, if any is queued.
    pub fn try_next_outbound(&mut self) -> Option<Envelope> {
        self.outbound.try_recv().ok()
    }

    /// Check if the registry closed the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Wait until the registry closes the connection.
    pub async fn closed(&self) {
        wait_closed(&self.connection).await;
    }
}

pub(crate) fn deliver_inbound(connection: &Connection, envelope: &Envelope) -> usize {
    if events::is_lifecycle(&envelope.event) {
        warn!(event = %envelope.event, "Ignoring lifecycle event received from relay");
        return 0;
    }
    connection.dispatch(&envelope.event, &envelope.data)
}

pub(crate) async fn wait_closed(connection: &Connection) {
    let mut rx = connection.closed.subscribe();
    // Sender lives inside the connection, so this only errors if it is gone.
    let _ = rx.wait_for(|closed| *closed).await;
}
