//! # roomcast-protocol
//!
//! Wire protocol definitions for the Roomcast room relay.
//!
//! Every message on a Roomcast socket is an [`Envelope`]: an event name and a
//! JSON payload, carried as a single WebSocket text frame.
//!
//! ## Control events
//!
//! - `subscribe` / `unsubscribe` - Room membership, payload is the room name
//! - `subscribed` / `unsubscribed` - Relay acknowledgments `{room, socketId}`
//! - `connect` / `disconnect` - Transport lifecycle signals, never sent on the wire
//!
//! Application events use caller-defined names and carry a
//! [`RoomPayload`] `{room, data, timestamp}`.
//!
//! ## Example
//!
//! ```rust
//! use roomcast_protocol::{codec, Envelope};
//!
//! let envelope = Envelope::subscribe("orders");
//!
//! let encoded = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.room_name(), Some("orders"));
//! ```

#![warn(missing_docs)]

pub mod codec;
pub mod envelope;
pub mod payloads;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::{events, Envelope};
pub use payloads::{
    now_iso8601, BroadcastPayload, EchoResponse, EmitRequest, EmitResponse, ErrorResponse,
    Greeting, HealthResponse, MembershipAck, RoomPayload,
};
