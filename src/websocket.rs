use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::bluetooth::decode::TelemetrySnapshot;
use crate::bluetooth::session::SessionEvent;

/// Message sent to WebSocket clients for each session event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    Connected {
        timestamp: i64,
    },
    Disconnected {
        timestamp: i64,
    },
    ServicesDiscovered {
        timestamp: i64,
    },
    Telemetry {
        timestamp: i64,
        characteristic: Uuid,
        snapshot: TelemetrySnapshot,
        summary: String,
    },
}

impl WsMessage {
    fn from_event(event: &SessionEvent) -> Self {
        let timestamp = Utc::now().timestamp();
        match event {
            SessionEvent::Connected => WsMessage::Connected { timestamp },
            SessionEvent::Disconnected => WsMessage::Disconnected { timestamp },
            SessionEvent::ServicesDiscovered => WsMessage::ServicesDiscovered { timestamp },
            SessionEvent::Telemetry {
                characteristic,
                snapshot,
                summary,
            } => WsMessage::Telemetry {
                timestamp,
                characteristic: *characteristic,
                snapshot: snapshot.clone(),
                summary: summary.clone(),
            },
        }
    }
}

/// WebSocket handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("WebSocket client connected");

    let mut rx = state.ws_tx.subscribe();

    let (mut sender, mut receiver) = socket.split();

    // Drain client messages so close frames are noticed
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    // Forward broadcast events to the client
    let mut send_task = tokio::spawn(async move {
        while let Ok(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize WebSocket message: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                warn!("Failed to send message to WebSocket client");
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    info!("WebSocket client disconnected");
}

/// Broadcast a session event to all connected WebSocket clients
pub fn broadcast_event(tx: &broadcast::Sender<WsMessage>, event: &SessionEvent) {
    // Send ignores errors (no receivers is fine)
    let _ = tx.send(WsMessage::from_event(event));
}
