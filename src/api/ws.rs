//! WebSocket event stream.
//!
//! On connect the client receives a `sync` snapshot, then every task,
//! trace and connector change as it happens. Clients may also send
//! `dispatch`, `process` and `retry` actions.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::AppState;
use crate::connectors::{ConnectorId, ConnectorSummary};
use crate::console::Console;
use crate::pipeline::{TraceEntry, TraceEvent};
use crate::tasks::{Task, TaskEvent};

/// Server-to-client messages that are not plain store/trace events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Full snapshot, sent on connect and after the client lags.
    Sync {
        tasks: Vec<Task>,
        trace: Vec<TraceEntry>,
        connectors: Vec<ConnectorSummary>,
        busy: bool,
    },
    Connectors {
        connectors: Vec<ConnectorSummary>,
    },
    Busy {
        busy: bool,
    },
    Error {
        message: String,
    },
}

/// Client-to-server actions.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    Dispatch {
        source: String,
        content: String,
        #[serde(default)]
        sender: Option<String>,
    },
    Process {
        task_id: String,
    },
    Retry {
        task_id: String,
    },
}

pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn snapshot(console: &Console) -> WsMessage {
    WsMessage::Sync {
        tasks: console.store().list().await,
        trace: console.trace().entries().await,
        connectors: console.registry().list().await,
        busy: console.orchestrator().is_busy(),
    }
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, msg: &T) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize WS message");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let console = state.console;
    info!("WebSocket client connected");

    // Subscribe before the snapshot so nothing falls in between.
    let mut tasks_rx = console.store().subscribe();
    let mut trace_rx = console.trace().subscribe();
    let mut connectors_rx = console.registry().subscribe();
    let mut busy_rx = console.orchestrator().subscribe_busy();
    connectors_rx.borrow_and_update();
    busy_rx.borrow_and_update();

    if !send_json(&mut socket, &snapshot(&console).await).await {
        warn!("Failed to send initial sync, client disconnected");
        return;
    }

    loop {
        let keep_going = tokio::select! {
            result = tasks_rx.recv() => match result {
                Ok(event) => send_json::<TaskEvent>(&mut socket, &event).await,
                Err(RecvError::Lagged(n)) => {
                    warn!(missed = n, "WS client lagged behind task events");
                    send_json(&mut socket, &snapshot(&console).await).await
                }
                Err(RecvError::Closed) => {
                    debug!("Task event channel closed");
                    false
                }
            },

            result = trace_rx.recv() => match result {
                Ok(event) => send_json::<TraceEvent>(&mut socket, &event).await,
                Err(RecvError::Lagged(n)) => {
                    warn!(missed = n, "WS client lagged behind trace events");
                    send_json(&mut socket, &snapshot(&console).await).await
                }
                Err(RecvError::Closed) => {
                    debug!("Trace event channel closed");
                    false
                }
            },

            changed = connectors_rx.changed() => {
                if changed.is_err() {
                    false
                } else {
                    connectors_rx.borrow_and_update();
                    let connectors = console.registry().list().await;
                    send_json(&mut socket, &WsMessage::Connectors { connectors }).await
                }
            }

            changed = busy_rx.changed() => {
                if changed.is_err() {
                    false
                } else {
                    let busy = *busy_rx.borrow_and_update();
                    send_json(&mut socket, &WsMessage::Busy { busy }).await
                }
            }

            result = socket.recv() => match result {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_client_message(&text, &console).await {
                        send_json(&mut socket, &reply).await
                    } else {
                        true
                    }
                }
                Some(Ok(Message::Ping(data))) => socket.send(Message::Pong(data)).await.is_ok(),
                Some(Ok(Message::Close(_))) | None => {
                    info!("WebSocket client disconnected");
                    false
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    false
                }
                _ => true,
            },
        };

        if !keep_going {
            break;
        }
    }

    info!("WebSocket connection closed");
}

/// Apply a client action. Returns an error message for the client when the
/// action was rejected.
async fn handle_client_message(text: &str, console: &Console) -> Option<WsMessage> {
    let action = match serde_json::from_str::<ClientAction>(text) {
        Ok(action) => action,
        Err(e) => {
            warn!(error = %e, raw = %text, "Failed to parse client action");
            return Some(WsMessage::Error {
                message: format!("Invalid action: {e}"),
            });
        }
    };

    let result = match action {
        ClientAction::Dispatch {
            source,
            content,
            sender,
        } => match source.parse::<ConnectorId>() {
            Ok(source) => {
                console.dispatch(source, sender, &content).await;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        },
        ClientAction::Process { task_id } => console
            .process(&task_id)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string()),
        ClientAction::Retry { task_id } => console
            .retry(&task_id)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string()),
    };

    match result {
        Ok(()) => None,
        Err(message) => {
            debug!(error = %message, "Client action rejected");
            Some(WsMessage::Error { message })
        }
    }
}
