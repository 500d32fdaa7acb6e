//! WebSocket connector.
//!
//! Drives a [`Link`] over a tokio-tungstenite client socket, reconnecting with
//! a fixed delay and a bounded number of consecutive attempts.

use futures_util::{SinkExt, StreamExt};
use roomcast_protocol::codec;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, trace, warn};

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::connection::{deliver_inbound, wait_closed, Link};
use crate::connector::Connector;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector that opens WebSocket connections to the relay.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    socket_path: String,
    policy: ReconnectPolicy,
}

impl WebSocketConnector {
    /// Create a connector.
    #[must_use]
    pub fn new(socket_path: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            socket_path: socket_path.into(),
            policy,
        }
    }

    /// Create a connector from client configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.socket_path.clone(), config.reconnection.clone())
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, link: Link) {
        let url = link.connection().endpoint().websocket_url(&self.socket_path);
        let policy = self.policy.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(drive(link, url, policy));
            }
            Err(_) => {
                error!(url = %url, "No tokio runtime; connection will stay disconnected");
            }
        }
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// How a session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// The registry closed the connection.
    Closed,
    /// The socket dropped.
    Dropped,
}

/// Connect, run sessions and reconnect until closed or out of attempts.
async fn drive(mut link: Link, url: String, policy: ReconnectPolicy) {
    let mut failures = 0u32;

    loop {
        if link.is_closed() {
            break;
        }

        debug!(url = %url, "Connecting to relay");
        let attempt = tokio::select! {
            result = connect_async(url.as_str()) => result,
            () = link.closed() => break,
        };

        match attempt {
            Ok((socket, _)) => {
                if failures > 0 {
                    info!(url = %url, "Reconnected to relay");
                }
                failures = 0;

                let end = run_session(&mut link, socket).await;
                link.disconnected();

                if end == SessionEnd::Closed {
                    break;
                }
                warn!(url = %url, "Connection to relay dropped");
            }
            Err(e) => {
                failures += 1;
                warn!(url = %url, error = %e, attempt = failures, "Connecting to relay failed");
            }
        }

        if !policy.enabled {
            debug!(url = %url, "Reconnection disabled");
            break;
        }
        if failures > policy.max_attempts {
            error!(url = %url, attempts = policy.max_attempts, "Reconnection attempts exhausted");
            break;
        }

        tokio::select! {
            () = tokio::time::sleep(policy.delay()) => {}
            () = link.closed() => break,
        }
    }

    debug!(url = %url, "Connection driver stopped");
}

/// Pump one socket until it drops or the connection is closed.
async fn run_session(link: &mut Link, socket: Socket) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();
    link.connected();

    let Link {
        connection,
        outbound,
    } = link;

    loop {
        tokio::select! {
            () = wait_closed(connection) => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Closed;
            }

            envelope = outbound.recv() => {
                let Some(envelope) = envelope else {
                    return SessionEnd::Closed;
                };
                let text = match codec::encode(&envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(event = %envelope.event, error = %e, "Dropping unencodable envelope");
                        continue;
                    }
                };
                trace!(event = %envelope.event, "Sending envelope");
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!(error = %e, "WebSocket send failed");
                    return SessionEnd::Dropped;
                }
            }

            message = stream.next() => {
                let decoded = match message {
                    Some(Ok(Message::Text(text))) => codec::decode(&text),
                    Some(Ok(Message::Binary(data))) => codec::decode_bytes(&data),
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            return SessionEnd::Dropped;
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_) | Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(_))) | Some(Err(WsError::ConnectionClosed)) | None => {
                        debug!("Relay closed the socket");
                        return SessionEnd::Dropped;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        return SessionEnd::Dropped;
                    }
                };

                match decoded {
                    Ok(envelope) => {
                        let listeners = deliver_inbound(connection, &envelope);
                        trace!(event = %envelope.event, listeners, "Delivered envelope");
                    }
                    Err(e) => warn!(error = %e, "Ignoring undecodable frame"),
                }
            }
        }
    }
}
