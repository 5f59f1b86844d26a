//! HTTP/WebSocket transport.
//!
//! The WebSocket endpoint (`/ws`) is the only write surface: it registers
//! the connection with the registry and broadcaster (the lifecycle hooks
//! that keep the registry authoritative), routes JSON client frames to the
//! session coordinator, and triggers the graceful disconnect path when the
//! socket goes away.
//!
//! Authentication happens upstream; the handler reads the resolved user id
//! from the request and never verifies credentials itself.
//!
//! The REST sliver is read-only. If you want to act on the server, speak
//! the WebSocket protocol.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use crate::error::ChatError;
use crate::server::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/rooms", get(list_rooms))
        .route("/rooms/{room}/users", get(room_users))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    /// Authenticated user id, resolved by the identity layer upstream.
    user: String,
    /// Display name; defaults to the user id.
    name: Option<String>,
    /// Set when the client is re-establishing a dropped connection.
    #[serde(default)]
    reconnect: bool,
}

/// Commands a client may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientFrame {
    Join { room: String },
    Leave { room: String },
    Send {
        room: String,
        content: String,
        #[serde(default)]
        id: Option<String>,
    },
    Typing { room: String },
    Activity,
    Kick {
        room: String,
        target: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Lock { room: String },
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ws.on_upgrade(move |socket| handle_socket(socket, state, query, user_agent))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: Arc<AppState>,
    query: WsQuery,
    user_agent: Option<String>,
) {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let connection_id = format!("conn-{}", COUNTER.fetch_add(1, Ordering::Relaxed));
    let user_id = query.user;
    let name = query.name.unwrap_or_else(|| user_id.clone());

    tracing::info!(connection = %connection_id, user = %user_id, reconnect = query.reconnect, "websocket connected");

    // Lifecycle hooks: the registry and broadcaster must know the
    // connection before any coordinator operation can fan out to it.
    let (tx, mut rx) = mpsc::channel::<String>(4096);
    state.registry.register(&connection_id, &user_id);
    state.broadcaster.attach(&connection_id, tx);

    let registered = if query.reconnect {
        state
            .coordinator
            .reconnect(&user_id, &name, &connection_id, user_agent.as_deref())
            .await
            .map(|_| None)
    } else {
        state
            .coordinator
            .connect(&user_id, &name, &connection_id, user_agent.as_deref())
            .await
            .map(Some)
    };

    match registered {
        Ok(Some(snapshot)) => {
            let frame = serde_json::json!({ "event": "logOn", "args": [snapshot] }).to_string();
            if socket.send(WsMessage::Text(frame.into())).await.is_err() {
                teardown(&state, &connection_id).await;
                return;
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(connection = %connection_id, user = %user_id, "registration failed: {e}");
            let _ = socket
                .send(WsMessage::Text(error_frame(&e.to_string()).into()))
                .await;
            teardown(&state, &connection_id).await;
            return;
        }
    }

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if socket.send(WsMessage::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        let frame = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::debug!(connection = %connection_id, "bad frame: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = dispatch(&state, &user_id, &connection_id, frame) {
                            if e.is_validation() {
                                let _ = socket
                                    .send(WsMessage::Text(error_frame(&e.to_string()).into()))
                                    .await;
                            } else {
                                tracing::error!(connection = %connection_id, "operation failed: {e}");
                                let _ = socket
                                    .send(WsMessage::Text(error_frame("internal error").into()))
                                    .await;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong handled by axum
                    Some(Err(e)) => {
                        tracing::debug!(connection = %connection_id, "socket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(connection = %connection_id, user = %user_id, "websocket closed");
    teardown(&state, &connection_id).await;
}

/// Disconnect lifecycle: detach the outbound channel, then let the
/// coordinator run the grace-window status recomputation.
async fn teardown(state: &AppState, connection_id: &str) {
    state.broadcaster.detach(connection_id);
    if let Err(e) = state.coordinator.disconnect(connection_id, true).await {
        tracing::error!(connection = %connection_id, "disconnect failed: {e}");
    }
}

fn dispatch(
    state: &AppState,
    user_id: &str,
    connection_id: &str,
    frame: ClientFrame,
) -> Result<(), ChatError> {
    match frame {
        ClientFrame::Join { room } => state.coordinator.join(user_id, &room).map(|_| ()),
        ClientFrame::Leave { room } => state.coordinator.leave(user_id, &room),
        ClientFrame::Send { room, content, id } => state
            .coordinator
            .send_message(user_id, Some(connection_id), &room, &content, id.as_deref())
            .map(|_| ()),
        ClientFrame::Typing { room } => state.coordinator.typing(user_id, &room),
        ClientFrame::Activity => state.coordinator.update_activity(user_id, connection_id),
        ClientFrame::Kick { room, target, reason } => {
            state.coordinator.kick(user_id, &target, &room, reason.as_deref())
        }
        ClientFrame::Lock { room } => state.coordinator.lock_room(user_id, &room),
    }
}

fn error_frame(message: &str) -> String {
    serde_json::json!({ "event": "error", "args": [message] }).to_string()
}

// ── Read-only REST ─────────────────────────────────────────────────────

async fn list_rooms(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let result = state.store.with_tx(|tx| {
        let mut out = Vec::new();
        for room in tx.all_rooms()? {
            // Private rooms are invisible to the public listing.
            if room.private {
                continue;
            }
            if let Some(summary) = tx.room_summary(&room.name)? {
                out.push(summary);
            }
        }
        Ok(out)
    });
    match result {
        Ok(rooms) => Json(rooms).into_response(),
        Err(e) => {
            tracing::error!("room listing failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn room_users(
    Path(room): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let result = state.store.with_tx(|tx| {
        match tx.get_room(&room)? {
            // Private rooms 404 rather than reveal their existence.
            None => Ok(None),
            Some(r) if r.private => Ok(None),
            Some(r) => {
                let users: Vec<crate::models::UserView> =
                    tx.online_users(&r.name)?.iter().map(Into::into).collect();
                Ok(Some(users))
            }
        }
    });
    match result {
        Ok(Some(users)) => Json(users).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("room user listing failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
