//! # roomcast-core
//!
//! The Roomcast event relay: the server-side counterpart that keeps track of
//! which sockets are members of which rooms and fans events out to them.
//!
//! - **Room** - Named membership set of sockets
//! - **Socket** - Identity and outbound queue of one accepted connection
//! - **Relay** - Join/leave handling, emit-to-room, broadcast, drop cleanup
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  subscribe   ┌─────────────┐      ┌─────────────┐
//! │   Socket    │─────────────▶│    Relay    │─────▶│    Room     │
//! └─────────────┘  unsubscribe └─────────────┘      └─────────────┘
//!        ▲                            │
//!        └──── {room, data, ts} ──────┘
//! ```
//!
//! Membership is scoped to a socket: when a socket is unregistered it leaves
//! every room it was in, and a reconnecting client must join again.

pub mod relay;
pub mod room;
pub mod socket;

pub use relay::{Relay, RelayConfig, RelayError, RelayStats};
pub use room::{validate_room_name, Room, RoomName};
pub use socket::{Outbound, SocketId};
