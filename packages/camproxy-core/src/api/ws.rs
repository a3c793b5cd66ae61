//! JSON WebSocket broker at `/api` (§4.7).
//!
//! Request/response dispatch to registered command handlers, plus
//! broadcast of domain events to every connected peer.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::AppState;
use crate::error::ProxyError;
use crate::protocol_constants::{WS_HEARTBEAT_CHECK_INTERVAL_SECS, WS_HEARTBEAT_TIMEOUT_SECS};

/// Result produced by a command handler.
pub type CommandResult = Result<Value, ProxyError>;

/// A boxed future resolving to a [`CommandResult`].
pub type CommandFuture = Pin<Box<dyn Future<Output = CommandResult> + Send>>;

/// A registered command handler. Takes the raw payload object and
/// returns a future resolving to the result value.
pub type CommandHandler = Arc<dyn Fn(Value) -> CommandFuture + Send + Sync>;

/// Maps `command` names to their handlers.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `command`.
    pub fn register<F, Fut>(&mut self, command: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        self.handlers
            .insert(command.into(), Arc::new(move |payload| Box::pin(handler(payload))));
    }

    fn get(&self, command: &str) -> Option<CommandHandler> {
        self.handlers.get(command).cloned()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Deserialize)]
struct IncomingFrame {
    #[serde(rename = "messageId")]
    message_id: String,
    command: String,
    #[serde(flatten)]
    payload: Value,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum OutgoingFrame {
    #[serde(rename = "version")]
    Version {
        #[serde(rename = "serverVersion")]
        server_version: String,
        #[serde(rename = "clientVersion")]
        client_version: String,
    },
    #[serde(rename = "result")]
    Result {
        #[serde(rename = "messageId")]
        message_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
    #[serde(rename = "event")]
    Event { event: Value },
    #[serde(rename = "error")]
    Error {
        error: String,
        message: String,
        #[serde(rename = "originalType", skip_serializing_if = "Option::is_none")]
        original_type: Option<String>,
    },
}

impl OutgoingFrame {
    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self).ok().map(|s| Message::Text(s.into()))
    }
}

/// Upgrades the connection and registers the peer.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let guard = state.ws_manager.register();
    let (mut sender, mut receiver) = socket.split();

    if state.commands.is_empty() {
        log::warn!("[WS] connection rejected: no command handlers registered");
        return;
    }

    let version_frame = OutgoingFrame::Version {
        server_version: env!("CARGO_PKG_VERSION").to_string(),
        client_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if let Some(msg) = version_frame.to_message() {
        if sender.send(msg).await.is_err() {
            return;
        }
    }

    let mut broadcast_rx = state.event_bridge.subscribe();
    let mut heartbeat_interval = tokio::time::interval(Duration::from_secs(WS_HEARTBEAT_CHECK_INTERVAL_SECS));
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            cancelled = guard.cancel_token().cancelled() => {
                let _ = cancelled;
                break;
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        let response = dispatch(&state, &text).await;
                        if let Some(msg) = response.to_message() {
                            if sender.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            event = broadcast_rx.recv() => {
                if let Ok(event) = event {
                    if let Ok(value) = serde_json::to_value(&event) {
                        let frame = OutgoingFrame::Event { event: value };
                        if let Some(msg) = frame.to_message() {
                            if sender.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > Duration::from_secs(WS_HEARTBEAT_TIMEOUT_SECS) {
                    log::warn!("[WS] heartbeat timeout, closing {}", guard.id());
                    break;
                }
            }
        }
    }
}

async fn dispatch(state: &AppState, text: &str) -> OutgoingFrame {
    let frame: IncomingFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            return OutgoingFrame::Error {
                error: "malformed_input".to_string(),
                message: e.to_string(),
                original_type: None,
            };
        }
    };

    let Some(handler) = state.commands.get(&frame.command) else {
        return OutgoingFrame::Result {
            message_id: frame.message_id,
            success: false,
            result: None,
            error_code: Some("Unknown command".to_string()),
        };
    };

    match handler(frame.payload).await {
        Ok(result) => OutgoingFrame::Result {
            message_id: frame.message_id,
            success: true,
            result: Some(result),
            error_code: None,
        },
        Err(err) => OutgoingFrame::Result {
            message_id: frame.message_id,
            success: false,
            result: None,
            error_code: Some(err.code().to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_dispatches_registered_command() {
        let mut registry = CommandRegistry::new();
        registry.register("ping", |_payload| async { Ok(serde_json::json!({ "pong": true })) });

        let handler = registry.get("ping").unwrap();
        let result = handler(Value::Null).await.unwrap();
        assert_eq!(result, serde_json::json!({ "pong": true }));
    }

    #[test]
    fn empty_registry_reports_empty() {
        assert!(CommandRegistry::new().is_empty());
    }
}
