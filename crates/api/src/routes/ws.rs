//! WebSocket push channel.
//!
//! Clients send `ClientFrame` JSON objects (`{"type": "join", "draw_id": ...}`)
//! and receive `PushMessage` JSON objects. A frame that does not parse is
//! answered with an `error` message; the connection stays open.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use gateway::{ClientFrame, PushMessage};
use inventory::NumberInventory;
use ledger::OrderStore;

use crate::state::AppState;

/// GET /ws
pub async fn upgrade<I: NumberInventory + 'static, S: OrderStore + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<I, S>>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket<I: NumberInventory + 'static, S: OrderStore + 'static>(
    socket: WebSocket,
    state: Arc<AppState<I, S>>,
) {
    let (connection_id, mut outbound) = state.rooms.connect().await;
    metrics::gauge!("ws_connections").increment(1.0);
    tracing::info!(%connection_id, "websocket connected");

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(error) => {
                    tracing::error!(%error, "failed to encode push message");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(frame) => recv_state.gateway.handle_frame(connection_id, frame).await,
                    Err(error) => {
                        tracing::debug!(%connection_id, %error, "unreadable client frame");
                        recv_state
                            .rooms
                            .send_to(
                                connection_id,
                                PushMessage::Error {
                                    message: format!("Invalid message: {error}"),
                                },
                            )
                            .await;
                    }
                },
                Message::Close(_) => break,
                // Pings are answered by axum.
                _ => {}
            }
        }
    });

    // Whichever side finishes first tears down the other.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.rooms.disconnect(connection_id).await;
    metrics::gauge!("ws_connections").decrement(1.0);
    tracing::info!(%connection_id, "websocket disconnected");
}
