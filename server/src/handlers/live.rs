//! WebSocket handler for live updates.
//!
//! Store events reach the connection through the [`ConnectionManager`];
//! requests from the client are answered on the same channel.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::stores::Stores;
use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};

/// Handle an established WebSocket connection.
///
/// Registers the connection, forwards outgoing messages from a spawned
/// task, answers incoming messages until the client leaves, then cleans up.
pub async fn handle_live_connection(
    socket: WebSocket,
    stores: Arc<Stores>,
    conn_manager: Arc<ConnectionManager>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = conn_manager.register(tx);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!(error = %e, "Failed to send WebSocket message");
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize WebSocket message");
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &stores);
                conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!(conn_id = %conn_id, "Binary messages not supported");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::debug!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Answer a client message.
pub fn process_message(text: &str, stores: &Stores) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => return ServerMessage::error(format!("Invalid message format: {e}"), None),
    };

    match client_msg {
        ClientMessage::Ping => ServerMessage::Pong,
        ClientMessage::Snapshot {
            collection,
            request_id,
        } => match stores.get(&collection) {
            Some(store) => {
                // Generation first: a change racing the copy is announced
                // with a newer generation afterwards.
                let generation = store.generation();
                ServerMessage::Snapshot {
                    records: store.snapshot(),
                    collection,
                    generation,
                    request_id,
                }
            }
            None => ServerMessage::error(format!("Unknown collection: {collection}"), request_id),
        },
    }
}
