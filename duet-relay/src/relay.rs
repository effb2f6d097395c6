//! Relay server core: shared state, WebSocket handler, and message dispatch.
//!
//! The relay accepts WebSocket connections, assigns each one a
//! [`ConnectionId`], and dispatches every inbound signaling frame to the
//! handler for its message kind. Room operations go through the
//! [`RoomStore`]; offer/answer/candidate/chat go through [`crate::router`].
//! When a socket closes, [`reconcile_disconnect`] cleans up after it.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use duet_proto::signal::JOIN_REFUSED_REASON;
use duet_proto::{ClientMessage, ConnectionId, RoomId, ServerMessage, codec};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::RelayConfig;
use crate::reconciler::reconcile_disconnect;
use crate::registry::ConnectionRegistry;
use crate::rooms::{RoomError, RoomStore};
use crate::router;

/// Default maximum accepted frame size in bytes (64 KB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Shared relay state: who is connected and which rooms exist.
///
/// Created once at startup and handed to every connection handler behind an
/// [`Arc`].
pub struct RelayState {
    /// Live connections and their outbound channels.
    pub registry: ConnectionRegistry,
    /// Room membership.
    pub rooms: RoomStore,
    /// Maximum accepted frame size in bytes.
    max_message_size: usize,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HealthReport {
    /// Always `"ok"` while the server answers.
    pub status: &'static str,
    /// Number of live connections.
    pub connections: usize,
    /// Number of live rooms.
    pub rooms: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a new relay state with an empty registry and room store,
    /// using default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_MESSAGE_SIZE, RoomStore::new())
    }

    /// Creates a new relay state with a custom frame size limit and room store.
    #[must_use]
    pub fn with_config(max_message_size: usize, rooms: RoomStore) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            rooms,
            max_message_size,
        }
    }

    /// Creates a relay state from resolved configuration.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::with_config(
            config.max_message_size,
            RoomStore::with_max_rooms(config.max_rooms),
        )
    }

    /// Current connection and room counts.
    pub fn health_report(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            connections: self.registry.len(),
            rooms: self.rooms.len(),
        }
    }

    /// Send a WebSocket Close frame to all connected peers.
    ///
    /// Each peer's writer task forwards the frame, after which the normal
    /// disconnect path runs for that connection.
    pub fn close_all_connections(&self) {
        self.registry.close_all();
    }

    /// Closes every connection and waits up to `grace` for each one to be
    /// reconciled.
    ///
    /// A connection is unregistered only after its writer has flushed the
    /// close frame, so once this returns `true` every peer has been sent
    /// one. Returns `false` if connections were still open at the deadline.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.close_all_connections();
        if tokio::time::timeout(grace, self.registry.wait_until_empty())
            .await
            .is_ok()
        {
            return true;
        }
        tracing::warn!(
            remaining = self.registry.len(),
            "connections still open after shutdown grace period"
        );
        false
    }
}

/// Handles an upgraded WebSocket connection for a single peer.
///
/// The connection lifecycle:
/// 1. Assign a connection id and register the outbound channel.
/// 2. Send `connected` with the id.
/// 3. Dispatch inbound frames in arrival order until the socket closes.
/// 4. Reconcile the disconnect exactly once.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let conn_id = ConnectionId::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.registry.register(conn_id, tx);
    tracing::info!(conn_id = %conn_id, "connection opened");

    let greeting = ServerMessage::Connected {
        connection_id: conn_id,
    };
    if let Err(e) = send_direct(&mut ws_sender, &greeting).await {
        tracing::error!(conn_id = %conn_id, error = %e, "failed to send greeting");
        state.registry.unregister(conn_id);
        return;
    }

    // Writer: forwards queued frames from the channel to the socket.
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn_id = %conn_id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Reader: frames from one connection are handled strictly in order.
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_frame(&reader_state, conn_id, text.as_bytes());
                }
                Message::Binary(data) => {
                    handle_frame(&reader_state, conn_id, &data);
                }
                Message::Close(_) => {
                    tracing::info!(conn_id = %conn_id, "received close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    let reader_finished = tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
            true
        }
        _ = &mut write_task => {
            read_task.abort();
            false
        }
    };
    if !reader_finished {
        // Handlers never await, so the aborted reader stops between frames.
        let _ = read_task.await;
    }

    let notified = reconcile_disconnect(&state.registry, &state.rooms, conn_id);
    tracing::info!(conn_id = %conn_id, notified, "connection closed");
}

/// Validates, decodes and dispatches one inbound frame.
///
/// Oversized or malformed frames are answered with an `error` message; the
/// connection stays open.
pub fn handle_frame(state: &RelayState, conn_id: ConnectionId, data: &[u8]) {
    if data.len() > state.max_message_size {
        tracing::warn!(
            conn_id = %conn_id,
            size = data.len(),
            max = state.max_message_size,
            "frame exceeds size limit"
        );
        let err = ServerMessage::Error {
            reason: format!(
                "message too large: {} bytes (max {})",
                data.len(),
                state.max_message_size
            ),
        };
        state.registry.send(conn_id, &err);
        return;
    }

    match codec::decode_client(data) {
        Ok(msg) => dispatch(state, conn_id, msg),
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, error = %e, "failed to decode frame");
            let err = ServerMessage::Error {
                reason: e.to_string(),
            };
            state.registry.send(conn_id, &err);
        }
    }
}

/// Runs the handler for one decoded message from `conn_id`.
pub fn dispatch(state: &RelayState, conn_id: ConnectionId, msg: ClientMessage) {
    match msg {
        ClientMessage::CreateRoom { room_id } => {
            handle_create_room(state, conn_id, room_id);
        }
        ClientMessage::JoinRoom { room_id } => {
            handle_join_room(state, conn_id, room_id);
        }
        ClientMessage::Offer { target_id, offer } => {
            router::route_offer(&state.registry, conn_id, target_id, offer);
        }
        ClientMessage::Answer { target_id, answer } => {
            router::route_answer(&state.registry, conn_id, target_id, answer);
        }
        ClientMessage::IceCandidate {
            target_id,
            candidate,
        } => {
            router::route_candidate(&state.registry, conn_id, target_id, candidate);
        }
        ClientMessage::ChatMessage {
            room_id,
            message,
            sender,
        } => {
            router::route_chat_message(
                &state.registry,
                &state.rooms,
                conn_id,
                &room_id,
                message,
                sender,
            );
        }
    }
}

fn handle_create_room(state: &RelayState, conn_id: ConnectionId, room_id: RoomId) {
    match state.rooms.create_room(&room_id, conn_id) {
        Ok(()) => {
            tracing::info!(conn_id = %conn_id, room_id = %room_id, "room created");
            let confirm = ServerMessage::RoomCreated { room_id };
            state.registry.send(conn_id, &confirm);
        }
        Err(e) => {
            tracing::warn!(
                conn_id = %conn_id,
                room_id = %room_id,
                error = %e,
                "room creation refused"
            );
            let err = ServerMessage::RoomError {
                reason: e.to_string(),
            };
            state.registry.send(conn_id, &err);
        }
    }
}

fn handle_join_room(state: &RelayState, conn_id: ConnectionId, room_id: RoomId) {
    let joined = state.rooms.join_room_with(&room_id, conn_id, |creator| {
        router::announce_pairing(&state.registry, &room_id, creator, conn_id);
    });
    match joined {
        Ok(creator) => {
            tracing::info!(
                conn_id = %conn_id,
                room_id = %room_id,
                creator = %creator,
                "room paired"
            );
        }
        Err(e) => {
            tracing::warn!(
                conn_id = %conn_id,
                room_id = %room_id,
                error = %e,
                "join refused"
            );
            let reason = match e {
                RoomError::RoomFull | RoomError::RoomNotFound => JOIN_REFUSED_REASON.to_string(),
                other => other.to_string(),
            };
            let err = ServerMessage::RoomError { reason };
            state.registry.send(conn_id, &err);
        }
    }
}

/// Encodes and sends a message directly on a WebSocket sender.
async fn send_direct(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    msg: &ServerMessage,
) -> Result<(), String> {
    let text = codec::encode_server(msg).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Builds the HTTP router: the signaling socket at `/ws` and `/health`.
pub fn build_router(state: Arc<RelayState>) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/health", axum::routing::get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// Use [`RelayState::from_config`] to build the state from the resolved
/// [`RelayConfig`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// axum handler for `GET /health`.
async fn health_handler(
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> axum::Json<HealthReport> {
    axum::Json(state.health_report())
}
