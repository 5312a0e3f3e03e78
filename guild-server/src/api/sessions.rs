//! Session and action endpoints (routed through the bridge)
//!
//! Endpoints:
//! - POST   /sessions                      connect a character
//! - DELETE /sessions/{id}                 disconnect
//! - POST   /sessions/{id}/move            position update
//! - POST   /sessions/{id}/actions         run a `GuildAction`
//! - GET    /sessions/{id}/notifications   drain parked notifications
//! - POST   /sessions/{id}/storage         open guild storage
//! - POST   /sessions/{id}/skills/{skill}  cast a guild skill
//! - POST   /siege                         open / close the siege window

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::{ApiError, ApiState, COMMAND_TIMEOUT};
use crate::bridge::{ActionResult, GuildCommand};
use crate::sessions::SessionLogin;
use guild_core::ports::Notification;
use guild_core::types::SessionId;
use guild_core::GuildAction;

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/sessions", post(connect))
        .route("/sessions/{id}", delete(disconnect))
        .route("/sessions/{id}/move", post(move_session))
        .route("/sessions/{id}/actions", post(run_action))
        .route("/sessions/{id}/notifications", get(drain_notifications))
        .route("/sessions/{id}/storage", post(open_storage))
        .route("/sessions/{id}/skills/{skill_id}", post(use_skill))
        .route("/siege", post(set_siege))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct ConnectResponse {
    pub session_id: SessionId,
}

#[derive(Deserialize)]
pub struct MoveRequest {
    pub zone: String,
    pub x: u16,
    pub y: u16,
}

#[derive(Deserialize)]
pub struct SiegeRequest {
    pub active: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Send a command and wait for the game loop's answer
async fn request<T>(
    state: &ApiState,
    build: impl FnOnce(oneshot::Sender<T>) -> GuildCommand,
) -> Result<T, ApiError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    state
        .commands
        .send(build(reply_tx))
        .map_err(|_| ApiError::Unavailable)?;
    match tokio::time::timeout(COMMAND_TIMEOUT, reply_rx).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(ApiError::Unavailable),
        Err(_) => Err(ApiError::Timeout),
    }
}

async fn connect(
    State(state): State<ApiState>,
    Json(login): Json<SessionLogin>,
) -> Result<(StatusCode, Json<ConnectResponse>), ApiError> {
    let session = request(&state, |reply| GuildCommand::Connect { login, reply }).await?;
    let session_id = session.ok_or_else(|| ApiError::Conflict("character already online".into()))?;
    Ok((StatusCode::CREATED, Json(ConnectResponse { session_id })))
}

async fn disconnect(State(state): State<ApiState>, Path(id): Path<SessionId>) -> Result<StatusCode, ApiError> {
    let known = request(&state, |reply| GuildCommand::Disconnect { session: id, reply }).await?;
    if !known {
        return Err(ApiError::NotFound(format!("session {id}")));
    }
    // Anything still parked belongs to a session that no longer exists
    state.mailbox.drain(id);
    Ok(StatusCode::NO_CONTENT)
}

async fn move_session(
    State(state): State<ApiState>,
    Path(id): Path<SessionId>,
    Json(req): Json<MoveRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .commands
        .send(GuildCommand::Move {
            session: id,
            zone: req.zone,
            x: req.x,
            y: req.y,
        })
        .map_err(|_| ApiError::Unavailable)?;
    Ok(StatusCode::ACCEPTED)
}

async fn run_action(
    State(state): State<ApiState>,
    Path(id): Path<SessionId>,
    Json(action): Json<GuildAction>,
) -> Result<Json<ActionResult>, ApiError> {
    let result = request(&state, |reply| GuildCommand::Action {
        session: id,
        action,
        reply,
    })
    .await?;
    Ok(Json(result))
}

async fn open_storage(State(state): State<ApiState>, Path(id): Path<SessionId>) -> Result<Json<ActionResult>, ApiError> {
    let result = request(&state, |reply| GuildCommand::OpenStorage { session: id, reply }).await?;
    Ok(Json(result))
}

async fn use_skill(
    State(state): State<ApiState>,
    Path((id, skill_id)): Path<(SessionId, u16)>,
) -> Result<Json<ActionResult>, ApiError> {
    let result = request(&state, |reply| GuildCommand::UseSkill {
        session: id,
        skill_id,
        reply,
    })
    .await?;
    Ok(Json(result))
}

async fn drain_notifications(State(state): State<ApiState>, Path(id): Path<SessionId>) -> Json<Vec<Notification>> {
    Json(state.mailbox.drain(id))
}

async fn set_siege(State(state): State<ApiState>, Json(req): Json<SiegeRequest>) -> Result<StatusCode, ApiError> {
    state
        .commands
        .send(GuildCommand::SetSiege { active: req.active })
        .map_err(|_| ApiError::Unavailable)?;
    Ok(StatusCode::ACCEPTED)
}
