//! Reconnection policy of the WebSocket connector against flaky relays.

use roomcast_client::{Endpoint, ReconnectPolicy, Registry, WebSocketConnector};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const WAIT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(300);

/// A relay address that counts every TCP connection it accepts.
///
/// The first `handshakes` connections complete the WebSocket upgrade and are
/// then dropped; every later one is dropped before the upgrade.
struct FlakyRelay {
    addr: SocketAddr,
    attempts: Arc<AtomicUsize>,
}

impl FlakyRelay {
    async fn spawn(handshakes: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&attempts);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = counter.fetch_add(1, Ordering::SeqCst);
                if seen < handshakes {
                    tokio::spawn(async move {
                        if let Ok(socket) = tokio_tungstenite::accept_async(stream).await {
                            drop(socket);
                        }
                    });
                } else {
                    drop(stream);
                }
            }
        });

        Self { addr, attempts }
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::parse(&format!("http://{}", self.addr)).unwrap()
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    async fn wait_for_attempts(&self, expected: usize) {
        let waited = tokio::time::timeout(WAIT, async {
            while self.attempts() < expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "saw {} of {expected} attempts", self.attempts());
    }
}

fn registry(policy: ReconnectPolicy) -> Registry {
    Registry::new(Arc::new(WebSocketConnector::new("/ws", policy)))
}

fn policy(enabled: bool, max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        enabled,
        max_attempts,
        delay_ms: 20,
    }
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let relay = FlakyRelay::spawn(0).await;
    let registry = registry(policy(true, 2));
    let connection = registry.acquire(&relay.endpoint());

    // The first connect plus two retries
    relay.wait_for_attempts(3).await;
    tokio::time::sleep(SETTLE).await;
    assert_eq!(relay.attempts(), 3);
    assert!(!connection.is_connected());
    assert!(!connection.is_closed());
}

#[tokio::test]
async fn test_disabled_reconnection_tries_once() {
    let relay = FlakyRelay::spawn(0).await;
    let registry = registry(policy(false, 5));
    let connection = registry.acquire(&relay.endpoint());

    relay.wait_for_attempts(1).await;
    tokio::time::sleep(SETTLE).await;
    assert_eq!(relay.attempts(), 1);
    assert!(!connection.is_connected());
}

#[tokio::test]
async fn test_successful_connect_resets_attempt_count() {
    // Three sessions that each drop, then a relay that refuses the upgrade
    let relay = FlakyRelay::spawn(3).await;
    let registry = registry(policy(true, 1));
    let connection = registry.acquire(&relay.endpoint());

    // 3 sessions, then the first failure plus one retry
    relay.wait_for_attempts(5).await;
    tokio::time::sleep(SETTLE).await;
    assert_eq!(relay.attempts(), 5);
    assert!(!connection.is_connected());

    assert_eq!(registry.release_all(), 1);
}

#[tokio::test]
async fn test_release_stops_retrying() {
    let relay = FlakyRelay::spawn(0).await;
    let registry = registry(ReconnectPolicy {
        enabled: true,
        max_attempts: u32::MAX,
        delay_ms: 50,
    });
    registry.acquire(&relay.endpoint());

    relay.wait_for_attempts(2).await;
    registry.release_all();
    // Allow one attempt already in flight to land
    tokio::time::sleep(Duration::from_millis(20)).await;
    let settled = relay.attempts();

    tokio::time::sleep(SETTLE).await;
    assert_eq!(relay.attempts(), settled);
}
