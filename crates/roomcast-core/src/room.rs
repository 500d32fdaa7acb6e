//! Room abstraction for Roomcast.
//!
//! Rooms are named sets of sockets. A room carries no state beyond its current
//! membership: leaving and rejoining only affects future deliveries.

use crate::socket::SocketId;
use std::collections::HashSet;
use tracing::debug;

/// A room name.
pub type RoomName = String;

/// Validate a room name.
///
/// Any non-empty string names a room; names are opaque and never truncated.
///
/// # Errors
///
/// Returns an error message if the room name is empty.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    Ok(())
}

/// Membership set of a single room.
#[derive(Debug)]
pub struct Room {
    name: RoomName,
    members: HashSet<SocketId>,
}

impl Room {
    /// Create a new, empty room.
    #[must_use]
    pub fn new(name: impl Into<RoomName>) -> Self {
        Self {
            name: name.into(),
            members: HashSet::new(),
        }
    }

    /// Get the room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a socket is a member.
    #[must_use]
    pub fn contains(&self, socket: &SocketId) -> bool {
        self.members.contains(socket)
    }

    /// Add a socket to this room.
    ///
    /// Returns `true` if the socket was not already a member.
    pub fn add(&mut self, socket: SocketId) -> bool {
        let added = self.members.insert(socket.clone());
        if added {
            debug!(room = %self.name, socket = %socket, "Socket joined room");
        }
        added
    }

    /// Remove a socket from this room.
    ///
    /// Returns `true` if the socket was a member.
    pub fn remove(&mut self, socket: &SocketId) -> bool {
        let removed = self.members.remove(socket);
        if removed {
            debug!(room = %self.name, socket = %socket, "Socket left room");
        }
        removed
    }

    /// Get all member IDs.
    #[must_use]
    pub fn members(&self) -> Vec<SocketId> {
        self.members.iter().cloned().collect()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
