//! WebSocket handler for client connections.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};

use drydock_protocol::{Command, Event};

use crate::api::AppState;

use super::hub::EventHub;

/// Ping interval for keepalive.
const PING_INTERVAL_SECS: u64 = 30;

/// WebSocket upgrade handler.
///
/// GET /api/ws
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_connection(socket, hub))
}

/// Handle a WebSocket connection until it closes.
///
/// Teardown discards this connection's topic memberships only; it never
/// affects manager-level sessions.
async fn handle_connection(socket: WebSocket, hub: Arc<EventHub>) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut event_rx) = hub.register_connection();

    if send_event(&mut sender, &Event::Connected).await.is_err() {
        warn!("Failed to greet connection {}", conn_id);
        hub.unregister_connection(&conn_id);
        return;
    }

    let mut ping = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
    ping.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        hub.touch(&conn_id);
                        handle_command(&hub, &conn_id, text.as_str(), &mut sender).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary/ping/pong frames count as activity only.
                        hub.touch(&conn_id);
                    }
                    Some(Err(e)) => {
                        debug!("Connection {} errored: {}", conn_id, e);
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if send_event(&mut sender, &Event::Ping).await.is_err() {
                    break;
                }
            }
        }
    }

    hub.unregister_connection(&conn_id);
    info!("Connection {} closed", conn_id);
}

async fn handle_command(
    hub: &Arc<EventHub>,
    conn_id: &str,
    text: &str,
    sender: &mut (impl SinkExt<Message> + Unpin),
) {
    match serde_json::from_str::<Command>(text) {
        Ok(Command::Join { topic }) => {
            hub.join(conn_id, &topic);
        }
        Ok(Command::Leave { topic }) => {
            hub.leave(conn_id, &topic);
        }
        Ok(Command::Pong) => {}
        Err(e) => {
            debug!("Connection {} sent malformed command: {}", conn_id, e);
            let _ = send_event(
                sender,
                &Event::Error {
                    message: format!("malformed command: {e}"),
                },
            )
            .await;
        }
    }
}

async fn send_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    event: &Event,
) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}
