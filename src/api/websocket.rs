use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};

use crate::session::{generate_connection_id, ClientEvent, SessionServer};

pub async fn handle_websocket(websocket: WebSocket, server: Arc<SessionServer>) {
    let connection_id = generate_connection_id();
    tracing::info!(connection_id = %connection_id, "New WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    server.add_connection(&connection_id, tx).await;

    // Spawn task to send messages to client
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                handle_websocket_message(&server, &connection_id, message).await;
            }
            Err(e) => {
                tracing::error!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        }
    }

    // Disconnect is equivalent to an explicit leave
    server.remove_connection(&connection_id).await;
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, "WebSocket connection closed");
}

async fn handle_websocket_message(
    server: &Arc<SessionServer>,
    connection_id: &str,
    message: Message,
) {
    if let Ok(text) = message.to_str() {
        tracing::debug!(connection_id = %connection_id, "Received client event: {}", text);

        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => {
                dispatch_event(server, connection_id, event).await;
            }
            Err(e) => {
                tracing::error!(
                    connection_id = %connection_id,
                    error = %e,
                    raw_message = %text,
                    "Failed to parse client event"
                );
            }
        }
    }
}

async fn dispatch_event(server: &Arc<SessionServer>, connection_id: &str, event: ClientEvent) {
    match event {
        ClientEvent::Join {
            room_id,
            user_name,
            role,
        } => {
            server
                .handle_join(connection_id, &room_id, &user_name, &role)
                .await;
        }
        ClientEvent::LeaveRoom => {
            server.handle_leave(connection_id).await;
        }
        ClientEvent::CodeChange { room_id, code } => {
            server.handle_code_change(connection_id, &room_id, code).await;
        }
        ClientEvent::LanguageChange { room_id, language } => {
            server
                .handle_language_change(connection_id, &room_id, language)
                .await;
        }
        ClientEvent::Typing { room_id, user_name } => {
            server.handle_typing(connection_id, &room_id, &user_name).await;
        }
    }
}
