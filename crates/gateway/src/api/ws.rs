//! Liveness event channel.
//!
//! `GET /ws/:session_id` upgrades to a WebSocket carrying a ping/pong
//! text protocol. The channel is not required for state progression; it
//! only lets a client confirm the service (and its session) is alive.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::state::AppState;

pub async fn session_ws(
    ws: WebSocketUpgrade,
    State(_state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id))
}

async fn handle_socket(socket: WebSocket, session_id: String) {
    tracing::debug!(session_id = %session_id, "ws connected");
    let (mut sink, mut stream) = socket.split();

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "ws read error");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                if is_ping(&text) {
                    let pong = serde_json::json!({
                        "type": "pong",
                        "sessionId": session_id,
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                    });
                    if sink.send(Message::Text(pong.to_string())).await.is_err() {
                        break;
                    }
                }
            }
            Message::Ping(payload) => {
                if sink.send(Message::Pong(payload)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    tracing::debug!(session_id = %session_id, "ws disconnected");
}

/// Accept both the bare `"ping"` text and the `{"type": "ping"}` JSON form.
fn is_ping(text: &str) -> bool {
    if text.trim() == "ping" {
        return true;
    }
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str().map(|s| s == "ping")))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_detection_accepts_both_forms() {
        assert!(is_ping("ping"));
        assert!(is_ping(" ping "));
        assert!(is_ping(r#"{"type": "ping"}"#));
        assert!(!is_ping(r#"{"type": "pong"}"#));
        assert!(!is_ping("hello"));
    }
}
