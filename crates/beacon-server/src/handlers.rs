//! Connection handlers for the Beacon server.
//!
//! This module owns the connection lifecycle: WebSocket upgrade, the
//! identify handshake, the per-connection signal loop, and the REST
//! endpoints the persistence layer calls after committing a write.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use beacon_core::{CallError, ConnectionHandle, ConnectionId, DisplayAttrs, Hub, HubConfig};
use beacon_protocol::{codec, ClientSignal, ProtocolError, ServerEvent};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The realtime hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub_config = HubConfig {
            max_rooms_per_connection: config.limits.max_rooms_per_connection,
            heartbeat_ms: config.heartbeat.interval_ms as u32,
        };

        Self {
            hub: Hub::with_config(hub_config),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/rooms/:room_id/notify", post(notify_room))
        .route("/users/:user_id/notify", post(notify_user))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Notification request from the persistence/REST collaborator.
#[derive(Debug, Deserialize)]
struct NotifyRequest {
    /// Application event name (`message-received`, `typing`, ...).
    event: String,
    /// Collaborator-produced payload, routed verbatim.
    payload: serde_json::Value,
    /// Optional connection to skip (don't-echo-to-sender semantics).
    #[serde(default)]
    exclude_connection: Option<String>,
}

/// Deliver a committed-write notification to every subscriber of a room.
async fn notify_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(req): Json<NotifyRequest>,
) -> impl IntoResponse {
    let exclude = req.exclude_connection.map(ConnectionId::from);
    let delivered = state.hub.deliver_to_room(
        &room_id,
        ServerEvent::notify(req.event, req.payload),
        exclude.as_ref(),
    );
    metrics::record_deliveries(delivered);

    Json(serde_json::json!({ "delivered": delivered }))
}

/// Deliver a notification to one user's live connection, if any.
async fn notify_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(req): Json<NotifyRequest>,
) -> impl IntoResponse {
    let delivered = state
        .hub
        .deliver_to_user(&user_id, ServerEvent::notify(req.event, req.payload));
    metrics::record_deliveries(usize::from(delivered));

    Json(serde_json::json!({ "delivered": delivered }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    debug!(connection = %connection_id, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Handshake: the first decodable frame must be `identify`.
    let (user_id, display) = loop {
        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => read_buffer.extend_from_slice(&data),
            Some(Ok(Message::Text(text))) => read_buffer.extend_from_slice(text.as_bytes()),
            Some(Ok(Message::Ping(data))) => {
                if sender.send(Message::Pong(data)).await.is_err() {
                    return;
                }
                continue;
            }
            Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                debug!(connection = %connection_id, "Closed before handshake");
                return;
            }
            Some(Err(e)) => {
                warn!(connection = %connection_id, error = %e, "WebSocket error during handshake");
                metrics::record_error("websocket");
                return;
            }
        }

        match codec::decode_from::<ClientSignal>(&mut read_buffer) {
            Ok(Some(ClientSignal::Identify {
                user_id,
                name,
                avatar_url,
            })) => break (user_id, DisplayAttrs::new(name, avatar_url)),
            Ok(Some(other)) => {
                warn!(
                    connection = %connection_id,
                    signal = other.name(),
                    "Expected identify as first signal"
                );
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Malformed handshake frame");
                metrics::record_error("decode");
                return;
            }
        }
    };

    // Admit: registers the identity (evicting any duplicate session) and
    // wires up the outbox this task drains.
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel();
    let handle = state
        .hub
        .admit(connection_id.clone(), user_id, display, outbox_tx);

    handle.send(ServerEvent::Connected {
        connection_id: connection_id.to_string(),
        heartbeat_ms: state.hub.heartbeat_ms(),
    });

    debug!(connection = %connection_id, user = %handle.user, "Connection identified");

    // Signal processing loop
    'conn: loop {
        tokio::select! {
            biased;

            // Drain the outbox: events queued by broadcasts, call relays,
            // and this connection's own acks, in queue order.
            Some(event) = outbox_rx.recv() => {
                let closing = matches!(event, ServerEvent::SessionReplaced {});
                match codec::encode(&event) {
                    Ok(data) => {
                        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                            break 'conn;
                        }
                    }
                    Err(e) => {
                        error!(connection = %connection_id, error = %e, "Failed to encode event");
                        metrics::record_error("encode");
                    }
                }
                if closing {
                    debug!(connection = %connection_id, "Session replaced by newer login");
                    break 'conn;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from::<ClientSignal>(&mut read_buffer) {
                                Ok(Some(signal)) => {
                                    metrics::record_signal(signal.name());
                                    handle_signal(signal, &handle, &state);
                                }
                                Ok(None) => break,
                                Err(ProtocolError::Decode(e)) => {
                                    // The frame was consumed; drop just this
                                    // signal and keep the connection.
                                    warn!(connection = %connection_id, error = %e, "Dropping malformed signal");
                                    metrics::record_error("decode");
                                }
                                Err(e) => {
                                    warn!(connection = %connection_id, error = %e, "Unrecoverable protocol error");
                                    metrics::record_error("protocol");
                                    break 'conn;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break 'conn;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break 'conn;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break 'conn;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break 'conn;
                    }
                }
            }
        }
    }

    // Cleanup before the task ends: registry entry, room subscriptions, and
    // delivery wiring all go away here, so nothing can be attributed to
    // this connection afterwards.
    state.hub.release(&connection_id);
    metrics::set_active_rooms(state.hub.stats().room_count);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Handle a decoded client signal.
fn handle_signal(signal: ClientSignal, handle: &ConnectionHandle, state: &AppState) {
    match signal {
        ClientSignal::Identify { .. } => {
            // Already identified; ignore
            debug!(connection = %handle.id, "Duplicate identify ignored");
        }

        ClientSignal::Join { room_id } => match state.hub.join(handle, &room_id) {
            Ok(_) => {
                handle.send(ServerEvent::Joined { room_id });
                metrics::set_active_rooms(state.hub.stats().room_count);
            }
            Err(e) => {
                warn!(connection = %handle.id, error = %e, "Join rejected");
                metrics::record_error("join");
            }
        },

        ClientSignal::Leave { room_id } => {
            state.hub.leave(handle, &room_id);
            metrics::set_active_rooms(state.hub.stats().room_count);
        }

        ClientSignal::CallInvite {
            callee,
            payload,
            room_id,
        } => match state.hub.call_invite(handle, &callee, payload, room_id) {
            Ok(()) => metrics::record_call_started(),
            Err(e) => {
                // Reported to the initiator only; an offline callee is a
                // normal outcome, not a server error.
                metrics::record_call_failed(call_failure_label(&e));
                handle.send(ServerEvent::call_failed(e.to_string()));
            }
        },

        ClientSignal::CallAccept { caller, payload } => {
            match state.hub.call_accept(handle, &caller, payload) {
                Ok(()) => {}
                // Duplicate retries for a settled session are routine.
                Err(CallError::UnknownSession) => {}
                Err(e) => {
                    metrics::record_call_failed(call_failure_label(&e));
                    handle.send(ServerEvent::call_failed(e.to_string()));
                }
            }
        }

        ClientSignal::CallReject { caller } => {
            state.hub.call_reject(handle, &caller);
        }

        ClientSignal::CallEnd { peer } => {
            state.hub.call_end(handle, &peer);
        }

        ClientSignal::CallNegotiation { peer, payload } => {
            match state.hub.call_negotiation(handle, &peer, payload) {
                Ok(()) => {}
                Err(CallError::UnknownSession) => {}
                Err(e) => {
                    metrics::record_call_failed(call_failure_label(&e));
                    handle.send(ServerEvent::call_failed(e.to_string()));
                }
            }
        }

        ClientSignal::Ping { timestamp } => {
            handle.send(ServerEvent::Pong { timestamp });
        }
    }
}

/// Metrics label for a call failure.
fn call_failure_label(error: &CallError) -> &'static str {
    match error {
        CallError::CalleeOffline => "offline",
        CallError::AlreadyInCall => "busy",
        CallError::UnknownSession => "unknown-session",
        CallError::PeerUnreachable => "unreachable",
    }
}
