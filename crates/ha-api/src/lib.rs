//! REST and WebSocket API
//!
//! Serves the websocket endpoint over axum. Integrations add their commands
//! to the shared [`CommandRegistry`]; this crate owns the message types, the
//! per-connection state and the config flow commands.

pub mod auth;
pub mod commands;
pub mod config_flow;
pub mod websocket;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use auth::{AuthState, User};
pub use commands::{
    codes, CommandError, CommandFuture, CommandHandler, CommandRegistry, CommandRequest,
    CommandResult,
};
pub use websocket::{ActiveConnection, ErrorInfo, OutgoingMessage, ResultMessage};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub commands: Arc<CommandRegistry>,
    pub auth: Arc<AuthState>,
}

/// API status response
#[derive(Serialize)]
struct ApiStatus {
    message: &'static str,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/websocket", get(websocket::ws_handler))
        .route("/api/", get(api_status))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server
pub async fn start_server(state: AppState, addr: &str) -> std::io::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, router).await
}

/// GET /api/ - Returns API status
async fn api_status() -> Json<ApiStatus> {
    Json(ApiStatus {
        message: "API running.",
    })
}
