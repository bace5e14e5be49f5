use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct KillSwitchState {
    pub active: bool,
}

/// GET /api/killswitch
pub async fn get_kill_switch(
    State(state): State<AppState>,
) -> Result<Json<KillSwitchState>, (StatusCode, String)> {
    let store = state.store.clone();

    let active = tokio::task::spawn_blocking(move || store.kill_switch())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(Json(KillSwitchState { active }))
}

/// PUT /api/killswitch — Enable or disable every delivery route at once.
/// Route creation is unaffected.
pub async fn set_kill_switch(
    State(state): State<AppState>,
    Json(req): Json<KillSwitchState>,
) -> Result<Json<KillSwitchState>, (StatusCode, String)> {
    let store = state.store.clone();
    let active = req.active;

    tokio::task::spawn_blocking(move || store.set_kill_switch(active))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    if active {
        tracing::warn!("Kill switch engaged, deliveries disabled");
    } else {
        tracing::info!("Kill switch released");
    }

    Ok(Json(KillSwitchState { active }))
}
