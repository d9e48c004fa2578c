//! WebSocket API
//!
//! Connections start with an auth phase (`auth_required` / `auth` /
//! `auth_ok`), then every text frame is a command handled by the
//! [`CommandRegistry`](crate::CommandRegistry).

use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use ha_core::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::User;
use crate::commands::CommandError;
use crate::AppState;

// =============================================================================
// Message Types
// =============================================================================

/// Message expected during the auth phase
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMessage {
    Auth { access_token: String },
}

/// Outgoing WebSocket message to client
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OutgoingMessage {
    AuthRequired(AuthRequiredMessage),
    AuthOk(AuthOkMessage),
    AuthInvalid(AuthInvalidMessage),
    Pong(PongMessage),
    Result(ResultMessage),
}

#[derive(Debug, Serialize)]
pub struct AuthRequiredMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub ha_version: String,
}

#[derive(Debug, Serialize)]
pub struct AuthOkMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub ha_version: String,
}

#[derive(Debug, Serialize)]
pub struct AuthInvalidMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct PongMessage {
    pub id: u64,
    #[serde(rename = "type")]
    pub msg_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub id: u64,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ResultMessage {
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            msg_type: "result".to_string(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, error: CommandError) -> Self {
        Self {
            id,
            msg_type: "result".to_string(),
            success: false,
            result: None,
            error: Some(error.to_error_info()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

// =============================================================================
// Connection State
// =============================================================================

/// Per-connection state
pub struct ActiveConnection {
    /// User ID for this authenticated connection
    user_id: Option<String>,
    is_admin: bool,
    /// Last message ID received
    last_id: AtomicU64,
}

impl ActiveConnection {
    pub fn new(user_id: Option<String>, is_admin: bool) -> Self {
        Self {
            user_id,
            is_admin,
            last_id: AtomicU64::new(0),
        }
    }

    pub fn for_user(user: &User) -> Self {
        Self::new(Some(user.id.clone()), user.is_admin)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    /// Create a new context for this connection (each operation gets a fresh context)
    pub fn new_context(&self) -> Context {
        match &self.user_id {
            Some(uid) => Context::with_user(uid),
            None => Context::new(),
        }
    }

    /// Validate that the message ID is increasing
    pub(crate) fn validate_id(&self, id: u64) -> Result<(), &'static str> {
        let last = self.last_id.load(Ordering::SeqCst);
        if id <= last {
            return Err("id_reuse");
        }
        self.last_id.store(id, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// WebSocket Handler
// =============================================================================

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let ha_version = env!("CARGO_PKG_VERSION").to_string();
    let auth_required = OutgoingMessage::AuthRequired(AuthRequiredMessage {
        msg_type: "auth_required",
        ha_version: ha_version.clone(),
    });

    if let Err(e) = send_message(&mut sender, &auth_required).await {
        error!("Failed to send auth_required: {}", e);
        return;
    }

    let auth_result = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        wait_for_auth(&mut receiver),
    )
    .await;

    let user = match auth_result {
        Ok(Ok(token)) => state.auth.validate_access_token(&token),
        Ok(Err(e)) => {
            debug!("Auth phase failed: {}", e);
            None
        }
        Err(_) => None,
    };

    let Some(user) = user else {
        let auth_invalid = OutgoingMessage::AuthInvalid(AuthInvalidMessage {
            msg_type: "auth_invalid",
            message: "Invalid access token or password".to_string(),
        });
        let _ = send_message(&mut sender, &auth_invalid).await;
        warn!("WebSocket client authentication failed");
        return;
    };

    let auth_ok = OutgoingMessage::AuthOk(AuthOkMessage {
        msg_type: "auth_ok",
        ha_version,
    });
    if let Err(e) = send_message(&mut sender, &auth_ok).await {
        error!("Failed to send auth_ok: {}", e);
        return;
    }
    info!(
        "WebSocket client authenticated (user_id: {}, admin: {})",
        user.id, user.is_admin
    );

    let conn = ActiveConnection::for_user(&user);

    // Writer task so slow clients do not block command handling
    let (tx, mut rx) = mpsc::channel::<OutgoingMessage>(256);
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if send_message(&mut sender, &msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                debug!("Received: {}", text);
                let reply = handle_text(&state, &conn, &text).await;
                if tx.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket client disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
        }
    }

    drop(tx);
    let _ = send_task.await;
    info!("WebSocket connection closed");
}

/// Answer `ping` directly, hand everything else to the command registry
pub async fn handle_text(state: &AppState, conn: &ActiveConnection, text: &str) -> OutgoingMessage {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(text) {
        let is_ping = map.get("type").and_then(|t| t.as_str()) == Some("ping");
        if let (true, Some(id)) = (is_ping, map.get("id").and_then(|i| i.as_u64())) {
            if conn.validate_id(id).is_ok() {
                return OutgoingMessage::Pong(PongMessage {
                    id,
                    msg_type: "pong",
                });
            }
            return OutgoingMessage::Result(ResultMessage::error(id, CommandError::IdReuse));
        }
    }

    OutgoingMessage::Result(state.commands.dispatch(conn, text).await)
}

/// Wait for the auth message and return its token
async fn wait_for_auth(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
) -> Result<String, String> {
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                return serde_json::from_str::<AuthMessage>(&text)
                    .map(|AuthMessage::Auth { access_token }| access_token)
                    .map_err(|e| format!("Expected auth message: {}", e));
            }
            Ok(Message::Close(_)) => {
                return Err("Connection closed".to_string());
            }
            Err(e) => {
                return Err(format!("WebSocket error: {}", e));
            }
            _ => {}
        }
    }
    Err("Connection closed".to_string())
}

/// Send a message to the WebSocket
async fn send_message(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &OutgoingMessage,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    debug!("Sending: {}", json);
    sender
        .send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
