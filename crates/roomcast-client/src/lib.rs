//! # roomcast-client
//!
//! Room subscriptions over one shared connection per relay endpoint.
//!
//! - [`Registry`] - One [`Connection`] per [`Endpoint`], created on first use
//!   and kept until [`Registry::release_all`]
//! - [`RoomSubscription`] - Joins a room on connect and on every reconnect,
//!   delivers `{room, data, timestamp}` payloads, leaves on stop
//! - [`RoomBinding`] - A consumer's typed delivery target for one (room, event)
//! - [`Connector`] - Drives the transport side of connections; the
//!   [`WebSocketConnector`] is the default
//!
//! ```rust,no_run
//! use roomcast_client::{Client, ClientConfig};
//! use serde_json::Value;
//!
//! # async fn run() {
//! let client = Client::websocket(ClientConfig::for_url("http://localhost:3000/api"));
//!
//! let orders = client.bind::<Value>("orders", "order-updated", false);
//! let mut target = orders.target();
//! while target.changed().await.is_ok() {
//!     if let Some(payload) = target.borrow_and_update().as_ref() {
//!         println!("{} -> {}", payload.room, payload.data);
//!     }
//! }
//!
//! client.shutdown();
//! # }
//! ```

#![warn(missing_docs)]

pub mod binding;
pub mod client;
pub mod config;
pub mod connection;
pub mod connector;
pub mod endpoint;
pub mod registry;
pub mod subscription;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use binding::{BindingParams, ConnectivityWatcher, RoomBinding};
pub use client::Client;
pub use config::{ClientConfig, Diagnostics, ReconnectPolicy};
pub use connection::{Connection, Link, Listener, ListenerId};
pub use connector::{ChannelConnector, ClientError, Connector};
pub use endpoint::Endpoint;
pub use registry::Registry;
pub use subscription::{RoomSubscription, SubscriptionState};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
