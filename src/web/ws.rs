//! Event WebSocket: pushes every pipeline event to connected clients and
//! accepts `{"action":"fetch"}` to start a batch.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::{AppState, start_batch};
use crate::pipeline::PipelineEvent;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientAction {
    Fetch,
    Status,
}

pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn send_json<T: serde::Serialize>(socket: &mut WebSocket, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize WS payload");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("WebSocket client connected");
    let mut rx = state.orchestrator.subscribe();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_json(&mut socket, &event).await {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        let notice = PipelineEvent::error(format!("{n} events were dropped"));
                        if !send_json(&mut socket, &notice).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_message(&text, &state) {
                            if !send_json(&mut socket, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

/// Returns a direct reply for this client, if any. Batch progress itself
/// arrives through the broadcast.
fn handle_client_message(text: &str, state: &AppState) -> Option<serde_json::Value> {
    match serde_json::from_str::<ClientAction>(text) {
        Ok(ClientAction::Fetch) => match start_batch(state, "ws-fetch", None) {
            Ok(()) => {
                info!("Batch started via WS");
                None
            }
            Err((_, message)) => {
                info!(reason = %message, "WS fetch rejected");
                serde_json::to_value(PipelineEvent::error(message)).ok()
            }
        },
        Ok(ClientAction::Status) => Some(serde_json::json!({
            "type": "batch_state",
            "running": state.orchestrator.is_running(),
            "batch": state.orchestrator.state(),
        })),
        Err(e) => {
            debug!(error = %e, text = text, "Unrecognized WS message from client");
            None
        }
    }
}
