//! Read-only views of the guild directory
//!
//! Endpoints:
//! - GET /guilds
//! - GET /guilds/{id}
//! - GET /strongholds

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use super::{ApiError, ApiState};
use crate::bridge::{GuildSummary, StrongholdSummary};
use guild_core::types::GuildId;

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/guilds", get(list_guilds))
        .route("/guilds/{id}", get(get_guild))
        .route("/strongholds", get(list_strongholds))
}

async fn list_guilds(State(state): State<ApiState>) -> Json<Vec<GuildSummary>> {
    let dir = state.directory.read().unwrap_or_else(|e| e.into_inner());
    Json(dir.guilds.values().cloned().collect())
}

async fn get_guild(
    State(state): State<ApiState>,
    Path(id): Path<GuildId>,
) -> Result<Json<GuildSummary>, ApiError> {
    let dir = state.directory.read().unwrap_or_else(|e| e.into_inner());
    dir.guilds
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("guild {id}")))
}

async fn list_strongholds(State(state): State<ApiState>) -> Json<Vec<StrongholdSummary>> {
    let dir = state.directory.read().unwrap_or_else(|e| e.into_inner());
    Json(dir.strongholds.clone())
}
