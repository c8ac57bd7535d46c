// src/handlers/rooms.rs

use std::sync::Arc;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use tokio::sync::broadcast::error::RecvError;

use crate::services::notifier::BroadcastHub;

/// Subscribes a WebSocket to a room's events. The room key is the join code.
pub async fn room_events(
    State(hub): State<Arc<BroadcastHub>>,
    Path(code): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| forward_room(socket, hub, code))
}

async fn forward_room(mut socket: WebSocket, hub: Arc<BroadcastHub>, code: String) {
    let mut rx = hub.subscribe(&code);
    tracing::debug!(room = %code, "Room subscriber connected");

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!("Failed to serialize room message: {:?}", e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(room = %code, skipped, "Room subscriber lagged, dropped events");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                // Clients only listen; anything but a close is ignored.
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    drop(rx);
    hub.prune();
    tracing::debug!(room = %code, "Room subscriber disconnected");
}
