//! Envelope type for the Roomcast protocol.
//!
//! An envelope is the unit of communication on a socket: the name of the event
//! and its JSON payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known event names.
pub mod events {
    /// Client asks to join a room. Payload: room name string.
    pub const SUBSCRIBE: &str = "subscribe";
    /// Client asks to leave a room. Payload: room name string.
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    /// Relay acknowledges a join. Payload: `{room, socketId}`.
    pub const SUBSCRIBED: &str = "subscribed";
    /// Relay acknowledges a leave. Payload: `{room, socketId}`.
    pub const UNSUBSCRIBED: &str = "unsubscribed";
    /// Transport connected (local signal only).
    pub const CONNECT: &str = "connect";
    /// Transport disconnected (local signal only).
    pub const DISCONNECT: &str = "disconnect";
    /// Relay greeting sent right after the socket is accepted.
    pub const CONNECTED: &str = "connected";
    /// Echo request.
    pub const MESSAGE: &str = "message";
    /// Echo reply.
    pub const RESPONSE: &str = "response";
    /// Connection-wide broadcast.
    pub const BROADCAST: &str = "broadcast";

    /// Check whether an event name is a local lifecycle signal.
    ///
    /// Lifecycle signals are raised by the transport and must never be
    /// emitted by application code or the relay.
    #[must_use]
    pub fn is_lifecycle(name: &str) -> bool {
        name == CONNECT || name == DISCONNECT
    }
}

/// A protocol envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Create an envelope from any serializable payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    pub fn with_payload<T: Serialize>(
        event: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event, serde_json::to_value(payload)?))
    }

    /// Create a `subscribe` control envelope.
    #[must_use]
    pub fn subscribe(room: impl Into<String>) -> Self {
        Self::new(events::SUBSCRIBE, Value::String(room.into()))
    }

    /// Create an `unsubscribe` control envelope.
    #[must_use]
    pub fn unsubscribe(room: impl Into<String>) -> Self {
        Self::new(events::UNSUBSCRIBE, Value::String(room.into()))
    }

    /// Create a `subscribed` acknowledgment.
    #[must_use]
    pub fn subscribed(room: impl Into<String>, socket_id: impl Into<String>) -> Self {
        Self::membership_ack(events::SUBSCRIBED, room, socket_id)
    }

    /// Create an `unsubscribed` acknowledgment.
    #[must_use]
    pub fn unsubscribed(room: impl Into<String>, socket_id: impl Into<String>) -> Self {
        Self::membership_ack(events::UNSUBSCRIBED, room, socket_id)
    }

    fn membership_ack(
        event: &str,
        room: impl Into<String>,
        socket_id: impl Into<String>,
    ) -> Self {
        Self::new(
            event,
            serde_json::json!({ "room": room.into(), "socketId": socket_id.into() }),
        )
    }

    /// Whether this envelope is a membership control message.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.event == events::SUBSCRIBE || self.event == events::UNSUBSCRIBE
    }

    /// The room name carried by a `subscribe`/`unsubscribe` envelope.
    #[must_use]
    pub fn room_name(&self) -> Option<&str> {
        if self.is_control() {
            self.data.as_str()
        } else {
            None
        }
    }

    /// Decode the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `T`.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::MembershipAck;
    use serde_json::json;

    #[test]
    fn test_control_envelopes() {
        let sub = Envelope::subscribe("orders");
        assert_eq!(sub.event, "subscribe");
        assert_eq!(sub.room_name(), Some("orders"));

        let unsub = Envelope::unsubscribe("orders");
        assert_eq!(unsub.event, "unsubscribe");
        assert_eq!(unsub.room_name(), Some("orders"));

        let app = Envelope::new("order-updated", json!("orders"));
        assert!(!app.is_control());
        assert_eq!(app.room_name(), None);
    }

    #[test]
    fn test_membership_ack_shape() {
        let ack = Envelope::subscribed("orders", "sock_1");
        assert_eq!(ack.event, "subscribed");
        assert_eq!(ack.data, json!({"room": "orders", "socketId": "sock_1"}));

        let decoded: MembershipAck = ack.decode_data().unwrap();
        assert_eq!(decoded.room, "orders");
        assert_eq!(decoded.socket_id, "sock_1");
    }

    #[test]
    fn test_lifecycle_names() {
        assert!(events::is_lifecycle("connect"));
        assert!(events::is_lifecycle("disconnect"));
        assert!(!events::is_lifecycle("connected"));
    }

    #[test]
    fn test_missing_data_defaults_to_null() {
        let envelope: Envelope = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(envelope.data, Value::Null);
    }
}
