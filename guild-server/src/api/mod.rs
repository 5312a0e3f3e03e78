//! HTTP/JSON API Layer
//!
//! A small operator and development surface next to the game loop:
//!
//! ```text
//! curl / tooling
//!       ↓ HTTP, JSON body
//! Axum Router (API_PORT)
//!       ↓
//! guilds   → reads the GuildDirectory snapshot
//! sessions → GuildCommand over the bridge, reply via oneshot
//! ```
//!
//! ## Endpoints
//! - `GET /health`, `GET /metrics`, `GET /metrics/json`
//! - `GET /guilds`, `GET /guilds/{id}`, `GET /strongholds`
//! - `POST /sessions`, `DELETE /sessions/{id}`
//! - `POST /sessions/{id}/actions`, `GET /sessions/{id}/notifications`
//! - `POST /sessions/{id}/storage`, `POST /sessions/{id}/skills/{skill_id}`
//! - `POST /siege`

pub mod guilds;
pub mod sessions;

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bridge::{CommandSender, SharedGuildDirectory};
use crate::mailbox::Mailbox;
use crate::metrics::ServerMetrics;

/// How long a handler waits for the game loop to answer a command
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state available to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Channel to the Bevy-side guild engine (write operations)
    pub commands: CommandSender,
    /// Snapshot of replicated guilds (read operations)
    pub directory: SharedGuildDirectory,
    /// Parked per-session notifications
    pub mailbox: Arc<Mailbox>,
    /// Server-wide metrics (lock-free atomics)
    pub metrics: Arc<ServerMetrics>,
}

/// Failures surfaced to HTTP clients
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("game loop did not answer in time")]
    Timeout,
    #[error("game loop is not running")]
    Unavailable,
    #[error("{0}")]
    Conflict(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the full API router
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(crate::metrics::prometheus_handler))
        .route("/metrics/json", get(crate::metrics::json_metrics_handler))
        .merge(guilds::routes())
        .merge(sessions::routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server on the given port
///
/// Runs alongside the Bevy app (spawned on the tokio runtime).
pub async fn start_api_server(state: ApiState, port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
