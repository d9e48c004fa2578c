//! WebSocket command registry
//!
//! Components register handlers for message types such as `zone/create`.
//! [`CommandRegistry::dispatch`] parses an incoming text frame, checks the
//! message id and the caller's permissions, runs the handler and wraps the
//! outcome in a [`ResultMessage`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use ha_core::Context;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::websocket::{ActiveConnection, ErrorInfo, ResultMessage};

/// Error codes reported in failed results
pub mod codes {
    pub const NOT_FOUND: &str = "not_found";
    pub const INVALID_FORMAT: &str = "invalid_format";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const UNKNOWN_COMMAND: &str = "unknown_command";
    pub const ID_REUSE: &str = "id_reuse";
    pub const HOME_ASSISTANT_ERROR: &str = "home_assistant_error";
    pub const UNKNOWN_ERROR: &str = "unknown_error";
}

/// Failure of a command, reported to the client as `{code, message}`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidFormat(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Identifier values have to increase.")]
    IdReuse,

    #[error("{0}")]
    HomeAssistant(String),

    #[error("{0}")]
    Unknown(String),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::NotFound(_) => codes::NOT_FOUND,
            CommandError::InvalidFormat(_) => codes::INVALID_FORMAT,
            CommandError::Unauthorized => codes::UNAUTHORIZED,
            CommandError::UnknownCommand(_) => codes::UNKNOWN_COMMAND,
            CommandError::IdReuse => codes::ID_REUSE,
            CommandError::HomeAssistant(_) => codes::HOME_ASSISTANT_ERROR,
            CommandError::Unknown(_) => codes::UNKNOWN_ERROR,
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

pub type CommandResult = Result<Value, CommandError>;

/// Future type for async command handlers
pub type CommandFuture = Pin<Box<dyn Future<Output = CommandResult> + Send>>;

/// Command handler function type
pub type CommandHandler = Arc<dyn Fn(CommandRequest) -> CommandFuture + Send + Sync>;

/// A parsed command handed to its handler
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub id: u64,
    pub command: String,
    /// The whole message, `id` and `type` included
    pub payload: Map<String, Value>,
    pub context: Context,
}

impl CommandRequest {
    /// Deserialize the message into a typed payload
    ///
    /// Unknown keys (`id`, `type`) are ignored unless the target type denies
    /// them.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, CommandError> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|e| CommandError::InvalidFormat(format!("Invalid message: {}", e)))
    }
}

struct RegisteredCommand {
    handler: CommandHandler,
    admin_only: bool,
}

/// All websocket commands by message type
pub struct CommandRegistry {
    commands: DashMap<String, RegisteredCommand>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: DashMap::new(),
        }
    }

    /// Register a command any authenticated connection may run
    pub fn register<F, Fut>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(CommandRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        self.insert(command.into(), false, handler);
    }

    /// Register a command only admin connections may run
    pub fn register_admin<F, Fut>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(CommandRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        self.insert(command.into(), true, handler);
    }

    fn insert<F, Fut>(&self, command: String, admin_only: bool, handler: F)
    where
        F: Fn(CommandRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        debug!(command = %command, admin_only, "Registering websocket command");
        let handler: CommandHandler =
            Arc::new(move |request| Box::pin(handler(request)) as CommandFuture);
        self.commands.insert(
            command,
            RegisteredCommand {
                handler,
                admin_only,
            },
        );
    }

    pub fn has_command(&self, command: &str) -> bool {
        self.commands.contains_key(command)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Handle one text frame and build the reply
    pub async fn dispatch(&self, conn: &ActiveConnection, text: &str) -> ResultMessage {
        let payload = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!("Received invalid JSON message");
                return ResultMessage::error(
                    0,
                    CommandError::InvalidFormat("Message incorrectly formatted.".into()),
                );
            }
        };

        let id = payload.get("id").and_then(Value::as_u64);
        let command = payload.get("type").and_then(Value::as_str).map(str::to_string);
        let (id, command) = match (id, command) {
            (Some(id), Some(command)) => (id, command),
            (id, _) => {
                return ResultMessage::error(
                    id.unwrap_or(0),
                    CommandError::InvalidFormat("Message incorrectly formatted.".into()),
                );
            }
        };

        if conn.validate_id(id).is_err() {
            return ResultMessage::error(id, CommandError::IdReuse);
        }

        let (handler, admin_only) = match self.commands.get(&command) {
            Some(registered) => (registered.handler.clone(), registered.admin_only),
            None => {
                warn!(command = %command, "Received unknown command");
                return ResultMessage::error(id, CommandError::UnknownCommand(command));
            }
        };

        if admin_only && !conn.is_admin() {
            warn!(command = %command, user_id = ?conn.user_id(), "Unauthorized command");
            return ResultMessage::error(id, CommandError::Unauthorized);
        }

        let request = CommandRequest {
            id,
            command: command.clone(),
            payload,
            context: conn.new_context(),
        };

        match handler(request).await {
            Ok(result) => ResultMessage::success(id, result),
            Err(e) => {
                debug!(command = %command, code = e.code(), "Command failed: {}", e);
                ResultMessage::error(id, e)
            }
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
