//! HTTP and WebSocket handlers for the Roomcast server.
//!
//! The control plane (`/health`, `/emit`) and the WebSocket endpoint share one
//! [`Relay`]; every accepted socket is registered with it for its lifetime.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use roomcast_core::{Relay, RelayConfig, RelayError, SocketId};
use roomcast_protocol::{
    codec, events, now_iso8601, EmitRequest, EmitResponse, ErrorResponse, HealthResponse,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The room relay.
    pub relay: Relay,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let relay_config = RelayConfig {
            max_rooms_per_socket: config.limits.max_rooms_per_socket,
            auto_delete_empty_rooms: true,
        };

        Self {
            relay: Relay::with_config(relay_config),
            config,
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/health", get(health_handler))
        .route("/emit", post(emit_handler))
        .route("/api/emit", post(emit_handler))
        .route(&state.config.websocket_path, get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let addr = config.bind_addr()?;
    let websocket_path = config.websocket_path.clone();
    let app = router(Arc::new(AppState::new(config)));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Roomcast server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, websocket_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Roomcast server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Health check handler.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: now_iso8601(),
        message: "Server is running".to_string(),
    })
}

/// Emit an event to every member of a room.
async fn emit_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EmitRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let (room, event, data) = match request.validate() {
        Ok(fields) => fields,
        Err(message) => return bad_request(message),
    };

    match state.relay.emit_to_room(&room, &event, data) {
        Ok(recipients) => {
            metrics::record_emit(recipients);
            debug!(room = %room, event = %event, recipients, "Emit request");
            Json(EmitResponse {
                success: true,
                room,
                event,
                timestamp: now_iso8601(),
            })
            .into_response()
        }
        Err(e @ (RelayError::InvalidRoom(_) | RelayError::ReservedEvent(_))) => {
            bad_request(e.to_string())
        }
        Err(e) => {
            error!(room = %room, event = %event, error = %e, "Emit failed");
            metrics::record_error("emit");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

fn bad_request(error: impl Into<String>) -> Response {
    metrics::record_error("bad_request");
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Pump one WebSocket through the relay until it closes.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (socket_id, mut outbound) = state.relay.register();
    debug!(socket = %socket_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            Some(envelope) = outbound.recv() => {
                let text = match codec::encode(&envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(socket = %socket_id, event = %envelope.event, error = %e, "Dropping unencodable envelope");
                        metrics::record_error("encode");
                        continue;
                    }
                };
                metrics::record_message(text.len(), "outbound");
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_frame(&state, &socket_id, text.as_bytes()),
                    Some(Ok(Message::Binary(data))) => handle_frame(&state, &socket_id, &data),
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(socket = %socket_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(socket = %socket_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(socket = %socket_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.relay.unregister(&socket_id);
    metrics::set_active_rooms(state.relay.stats().room_count);

    debug!(socket = %socket_id, "WebSocket disconnected");
}

/// Decode one inbound frame and hand it to the relay.
fn handle_frame(state: &AppState, socket_id: &SocketId, data: &[u8]) {
    let start = Instant::now();
    metrics::record_message(data.len(), "inbound");

    let envelope = match codec::decode_bytes(data) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(socket = %socket_id, error = %e, "Undecodable frame");
            metrics::record_error("decode");
            return;
        }
    };

    let membership = match envelope.event.as_str() {
        events::SUBSCRIBE => Some("join"),
        events::UNSUBSCRIBE => Some("leave"),
        _ => None,
    };

    match state.relay.handle_inbound(socket_id, envelope) {
        Ok(()) => {
            if let Some(kind) = membership {
                metrics::record_membership(kind);
                metrics::set_active_rooms(state.relay.stats().room_count);
            }
        }
        Err(e) => {
            warn!(socket = %socket_id, error = %e, "Rejected inbound envelope");
            metrics::record_error("relay");
        }
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}
