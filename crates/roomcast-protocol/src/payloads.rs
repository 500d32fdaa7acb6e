//! Typed payloads carried inside envelopes and on the HTTP control plane.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current time as an ISO-8601 UTC string with millisecond precision.
#[must_use]
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Payload delivered to room members for an application event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomPayload<T = Value> {
    /// Room the event was emitted to.
    pub room: String,
    /// Application data. Absent on the wire decodes as `T::default()`,
    /// which is `null` for untyped payloads.
    #[serde(default)]
    pub data: T,
    /// Emission time (ISO-8601).
    pub timestamp: String,
}

impl RoomPayload {
    /// Create a payload stamped with the current time.
    #[must_use]
    pub fn now(room: impl Into<String>, data: Value) -> Self {
        Self {
            room: room.into(),
            data,
            timestamp: now_iso8601(),
        }
    }
}

/// Acknowledgment of a `subscribe` or `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipAck {
    /// Room that was joined or left.
    pub room: String,
    /// Relay-assigned id of the acknowledged socket.
    #[serde(rename = "socketId")]
    pub socket_id: String,
}

/// Greeting sent by the relay once a socket is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    /// Relay-assigned id of the new socket.
    #[serde(rename = "socketId")]
    pub socket_id: String,
}

/// Reply to a `message` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoResponse {
    /// The `message` data, unchanged.
    pub received: Value,
    /// Reply time (ISO-8601).
    pub timestamp: String,
    /// Socket the message came from.
    #[serde(rename = "socketId")]
    pub socket_id: String,
}

/// Connection-wide broadcast payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastPayload {
    /// Broadcast data, unchanged.
    pub message: Value,
    /// Socket id of the sender.
    pub from: String,
    /// Broadcast time (ISO-8601).
    pub timestamp: String,
}

/// Body of `POST /emit`.
///
/// Fields are optional on the wire so that a missing field can be reported
/// as a 400 instead of a deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmitRequest {
    /// Target room.
    #[serde(default)]
    pub room: Option<String>,
    /// Event name delivered to the room's members.
    #[serde(default)]
    pub event: Option<String>,
    /// Application data; `null` when absent.
    #[serde(default)]
    pub data: Value,
}

impl EmitRequest {
    /// Error message reported when `room` or `event` is missing.
    pub const MISSING_FIELDS: &'static str = "Fields 'room' and 'event' are required";

    /// Validate the request, returning `(room, event, data)`.
    ///
    /// Empty strings count as missing.
    ///
    /// # Errors
    ///
    /// Returns a descriptive message if a required field is absent.
    pub fn validate(self) -> Result<(String, String, Value), &'static str> {
        match (self.room, self.event) {
            (Some(room), Some(event)) if !room.is_empty() && !event.is_empty() => {
                Ok((room, event, self.data))
            }
            _ => Err(Self::MISSING_FIELDS),
        }
    }
}

/// Successful reply to `POST /emit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitResponse {
    /// Always `true`; failures use [`ErrorResponse`].
    pub success: bool,
    /// Room the event was emitted to.
    pub room: String,
    /// Event name as given.
    pub event: String,
    /// Emission time (ISO-8601).
    pub timestamp: String,
}

/// Reply to `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"` while the server is serving.
    pub status: String,
    /// Response time (ISO-8601).
    pub timestamp: String,
    /// Human-readable status line.
    pub message: String,
}

/// Error body for rejected control-plane requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Why the request was rejected.
    pub error: String,
}
