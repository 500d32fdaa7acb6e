//! Room relay for Roomcast.
//!
//! The relay tracks accepted sockets and their room memberships, answers
//! join/leave control messages, and fans application events out to rooms.

use crate::room::{validate_room_name, Room, RoomName};
use crate::socket::{Outbound, OutboundSender, SocketId};
use dashmap::DashMap;
use roomcast_protocol::{
    events, now_iso8601, BroadcastPayload, EchoResponse, Envelope, RoomPayload,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoom(&'static str),

    /// Lifecycle event names cannot be emitted.
    #[error("Event name is reserved: {0}")]
    ReservedEvent(String),

    /// The socket is not registered.
    #[error("Unknown socket: {0}")]
    UnknownSocket(SocketId),

    /// Maximum rooms per socket reached.
    #[error("Maximum rooms per socket reached")]
    TooManyRooms,

    /// Payload could not be encoded.
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum rooms a single socket may be a member of. Unbounded when `None`.
    pub max_rooms_per_socket: Option<usize>,
    /// Whether to drop rooms once their last member leaves.
    pub auto_delete_empty_rooms: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_rooms_per_socket: None,
            auto_delete_empty_rooms: true,
        }
    }
}

/// A registered socket.
struct SocketEntry {
    sender: OutboundSender,
    rooms: HashSet<RoomName>,
}

/// The room relay.
///
/// Lock order is always `sockets` before `rooms`.
pub struct Relay {
    sockets: DashMap<SocketId, SocketEntry>,
    rooms: DashMap<RoomName, Room>,
    config: RelayConfig,
}

impl Relay {
    /// Create a new relay with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    /// Create a new relay with custom configuration.
    #[must_use]
    pub fn with_config(config: RelayConfig) -> Self {
        info!("Creating relay with config: {:?}", config);
        Self {
            sockets: DashMap::new(),
            rooms: DashMap::new(),
            config,
        }
    }

    /// Get relay statistics.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            room_count: self.rooms.len(),
            socket_count: self.sockets.len(),
            total_memberships: self.sockets.iter().map(|s| s.rooms.len()).sum(),
        }
    }

    /// Register a freshly accepted socket.
    ///
    /// The socket's outbound queue starts with a `connected` greeting.
    pub fn register(&self) -> (SocketId, Outbound) {
        let id = SocketId::generate();
        let (sender, receiver) = mpsc::unbounded_channel();

        let greeting = Envelope::new(
            events::CONNECTED,
            serde_json::json!({ "socketId": id.as_str() }),
        );
        let _ = sender.send(Arc::new(greeting));

        self.sockets.insert(
            id.clone(),
            SocketEntry {
                sender,
                rooms: HashSet::new(),
            },
        );

        debug!(socket = %id, "Socket registered");
        (id, receiver)
    }

    /// Remove a socket and its membership in every room.
    pub fn unregister(&self, socket: &SocketId) {
        let Some((_, entry)) = self.sockets.remove(socket) else {
            return;
        };

        for room_name in &entry.rooms {
            self.remove_member(room_name, socket);
        }

        debug!(socket = %socket, rooms = entry.rooms.len(), "Socket unregistered");
    }

    /// Add a socket to a room and acknowledge with `subscribed`.
    ///
    /// Joining a room twice is not an error; the acknowledgment is sent
    /// either way. Returns `true` if the socket was not already a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the room name is empty, the socket is unknown,
    /// or the socket is already in the configured maximum number of rooms.
    pub fn join(&self, socket: &SocketId, room_name: &str) -> Result<bool, RelayError> {
        validate_room_name(room_name).map_err(RelayError::InvalidRoom)?;

        let mut entry = self
            .sockets
            .get_mut(socket)
            .ok_or_else(|| RelayError::UnknownSocket(socket.clone()))?;

        let joined = if entry.rooms.contains(room_name) {
            false
        } else {
            if self
                .config
                .max_rooms_per_socket
                .is_some_and(|max| entry.rooms.len() >= max)
            {
                return Err(RelayError::TooManyRooms);
            }
            entry.rooms.insert(room_name.to_string());
            self.rooms
                .entry(room_name.to_string())
                .or_insert_with(|| {
                    debug!(room = %room_name, "Creating new room");
                    Room::new(room_name)
                })
                .add(socket.clone());
            true
        };

        let _ = entry
            .sender
            .send(Arc::new(Envelope::subscribed(room_name, socket.as_str())));

        debug!(room = %room_name, socket = %socket, "Subscribed");
        Ok(joined)
    }

    /// Remove a socket from a room and acknowledge with `unsubscribed`.
    ///
    /// Leaving a room the socket is not in is acknowledged as well. Returns
    /// `true` if the socket was a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is unknown.
    pub fn leave(&self, socket: &SocketId, room_name: &str) -> Result<bool, RelayError> {
        let mut entry = self
            .sockets
            .get_mut(socket)
            .ok_or_else(|| RelayError::UnknownSocket(socket.clone()))?;

        let left = entry.rooms.remove(room_name);
        if left {
            self.remove_member(room_name, socket);
        }

        let _ = entry
            .sender
            .send(Arc::new(Envelope::unsubscribed(room_name, socket.as_str())));

        debug!(room = %room_name, socket = %socket, "Unsubscribed");
        Ok(left)
    }

    fn remove_member(&self, room_name: &str, socket: &SocketId) {
        if let Some(mut room) = self.rooms.get_mut(room_name) {
            room.remove(socket);

            if self.config.auto_delete_empty_rooms && room.is_empty() {
                drop(room);
                self.rooms.remove_if(room_name, |_, r| r.is_empty());
                debug!(room = %room_name, "Deleted empty room");
            }
        }
    }

    /// Emit an application event to every member of a room.
    ///
    /// Members receive `{room, data, timestamp}` under `event`. Returns the
    /// number of sockets the event was queued for.
    ///
    /// # Errors
    ///
    /// Returns an error if `event` is a lifecycle name or the room name is invalid.
    pub fn emit_to_room(
        &self,
        room_name: &str,
        event: &str,
        data: Value,
    ) -> Result<usize, RelayError> {
        validate_room_name(room_name).map_err(RelayError::InvalidRoom)?;
        if events::is_lifecycle(event) {
            return Err(RelayError::ReservedEvent(event.to_string()));
        }

        let members = self.room_members(room_name);
        if members.is_empty() {
            trace!(room = %room_name, event = %event, "Emit to empty room");
            return Ok(0);
        }

        let envelope = Arc::new(Envelope::with_payload(
            event,
            &RoomPayload::now(room_name, data),
        )?);

        let count = members
            .iter()
            .filter(|id| self.send_shared(id, &envelope))
            .count();

        debug!(room = %room_name, event = %event, recipients = count, "Emitted to room");
        Ok(count)
    }

    /// Send an envelope to every registered socket regardless of room.
    ///
    /// Returns the number of sockets the envelope was queued for.
    pub fn broadcast(&self, envelope: Envelope) -> usize {
        let envelope = Arc::new(envelope);
        let count = self
            .sockets
            .iter()
            .filter(|entry| entry.sender.send(Arc::clone(&envelope)).is_ok())
            .count();
        trace!(event = %envelope.event, recipients = count, "Broadcast");
        count
    }

    /// Send an envelope to a single socket.
    ///
    /// Returns `false` if the socket is unknown or its queue is closed.
    pub fn send_to(&self, socket: &SocketId, envelope: Envelope) -> bool {
        self.send_shared(socket, &Arc::new(envelope))
    }

    fn send_shared(&self, socket: &SocketId, envelope: &Arc<Envelope>) -> bool {
        self.sockets
            .get(socket)
            .is_some_and(|entry| entry.sender.send(Arc::clone(envelope)).is_ok())
    }

    /// Handle an envelope received from a socket.
    ///
    /// Membership control messages, echo requests and socket-originated
    /// broadcasts are understood; anything else is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if a control message is malformed or rejected.
    pub fn handle_inbound(&self, socket: &SocketId, envelope: Envelope) -> Result<(), RelayError> {
        match envelope.event.as_str() {
            events::SUBSCRIBE => {
                let room = envelope
                    .room_name()
                    .ok_or(RelayError::InvalidRoom("Room name must be a string"))?;
                self.join(socket, room)?;
            }
            events::UNSUBSCRIBE => {
                let room = envelope
                    .room_name()
                    .ok_or(RelayError::InvalidRoom("Room name must be a string"))?;
                self.leave(socket, room)?;
            }
            events::MESSAGE => {
                debug!(socket = %socket, "Echo request");
                let reply = EchoResponse {
                    received: envelope.data,
                    timestamp: now_iso8601(),
                    socket_id: socket.to_string(),
                };
                self.send_to(socket, Envelope::with_payload(events::RESPONSE, &reply)?);
            }
            events::BROADCAST => {
                let payload = BroadcastPayload {
                    message: envelope.data,
                    from: socket.to_string(),
                    timestamp: now_iso8601(),
                };
                let count = self.broadcast(Envelope::with_payload(events::BROADCAST, &payload)?);
                debug!(socket = %socket, recipients = count, "Socket broadcast");
            }
            other => {
                warn!(socket = %socket, event = %other, "Ignoring unexpected event");
            }
        }
        Ok(())
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room_name: &str) -> bool {
        self.rooms.contains_key(room_name)
    }

    /// Get the member count for a room.
    #[must_use]
    pub fn member_count(&self, room_name: &str) -> usize {
        self.rooms
            .get(room_name)
            .map(|r| r.member_count())
            .unwrap_or(0)
    }

    /// Get the members of a room.
    #[must_use]
    pub fn room_members(&self, room_name: &str) -> Vec<SocketId> {
        self.rooms
            .get(room_name)
            .map(|r| r.members())
            .unwrap_or_default()
    }

    /// Get the rooms a socket is a member of.
    #[must_use]
    pub fn socket_rooms(&self, socket: &SocketId) -> Vec<RoomName> {
        self.sockets
            .get(socket)
            .map(|s| s.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get all room names.
    #[must_use]
    pub fn room_names(&self) -> Vec<RoomName> {
        self.rooms.iter().map(|r| r.key().clone()).collect()
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

/// Relay statistics.
#[derive(Debug, Clone)]
pub struct RelayStats {
    /// Number of rooms with at least one member.
    pub room_count: usize,
    /// Number of registered sockets.
    pub socket_count: usize,
    /// Total number of (socket, room) memberships.
    pub total_memberships: usize,
}
