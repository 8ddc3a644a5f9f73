//! WebSocket handler for real-time lifecycle event streaming.
//!
//! The `/api/v1/ws/events` endpoint upgrades an HTTP connection to a
//! WebSocket. Once connected, the handler:
//!
//! - **Forwards events:** Subscribes to the [`EventBus`] on [`AppState`] and
//!   pushes every [`LifecycleEvent`] to the client as a JSON text frame.
//! - **Receives commands:** Parses incoming text frames as [`WsCommand`] and
//!   answers status queries and pings.
//!
//! Lagged receivers (when the client is too slow to keep up) lose the
//! oldest events; the client is told how many it missed and keeps receiving.
//!
//! [`EventBus`]: msgdeck_core::event::EventBus
//! [`LifecycleEvent`]: msgdeck_types::event::LifecycleEvent

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;

use msgdeck_types::session::SessionStatus;

use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::path::parse_account_key;
use crate::state::AppState;

/// Incoming command from a WebSocket client.
///
/// Clients send JSON-encoded text frames matching one of these variants.
/// Unknown or malformed messages are answered with an error frame.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    /// Ask for the current status of one account.
    GetStatus {
        platform: String,
        phone_number: String,
    },
    /// Keep-alive ping. Server responds with `{"type":"pong"}`.
    Ping,
}

/// Server frames other than forwarded events.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsReply {
    Status { status: SessionStatus },
    Pong,
    /// Events dropped because this client fell behind.
    Lagged { skipped: u64 },
    Error { message: String },
}

/// Upgrade an HTTP request to a WebSocket connection for lifecycle events.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    _auth: Authenticated,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Core WebSocket connection handler.
///
/// Multiplexes bus events and client frames in a single task with
/// `tokio::select!`, so replies and events share one ordered sender.
async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut event_rx = state.event_bus.subscribe();
    tracing::debug!(subscribers = state.event_bus.receiver_count(), "WebSocket client subscribed");

    loop {
        tokio::select! {
            event_result = event_rx.recv() => {
                match event_result {
                    Ok(event) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!("Failed to serialize LifecycleEvent: {err}");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "WebSocket subscriber lagged, skipping {n} events");
                        if send_reply(&mut ws_sender, &WsReply::Lagged { skipped: n }).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // EventBus sender was dropped (server shutting down)
                        break;
                    }
                }
            }

            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        let reply = process_command(&text, &state);
                        if send_reply(&mut ws_sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!("WebSocket receive error: {err}");
                        break;
                    }
                    // Ignore binary, ping, pong protocol frames (handled by axum/tungstenite)
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!("WebSocket connection closed");
}

async fn send_reply(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    reply: &WsReply,
) -> Result<(), axum::Error> {
    match serde_json::to_string(reply) {
        Ok(json) => ws_sender.send(Message::Text(json.into())).await,
        Err(err) => {
            tracing::warn!("Failed to serialize WebSocket reply: {err}");
            Ok(())
        }
    }
}

/// Parse and answer a single command from the WebSocket client.
fn process_command(text: &str, state: &AppState) -> WsReply {
    let cmd: WsCommand = match serde_json::from_str(text) {
        Ok(cmd) => cmd,
        Err(err) => {
            tracing::warn!(raw = %text, error = %err, "Ignoring malformed WebSocket command");
            return WsReply::Error {
                message: format!("malformed command: {err}"),
            };
        }
    };

    match cmd {
        WsCommand::GetStatus {
            platform,
            phone_number,
        } => match parse_account_key(&platform, &phone_number) {
            Ok(key) => WsReply::Status {
                status: state.sessions.get_status(&key),
            },
            Err(err) => WsReply::Error {
                message: err.classify().2,
            },
        },
        WsCommand::Ping => WsReply::Pong,
    }
}
