use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

use crate::db::models::BlockedEntry;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub ip_address: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct BlockedResponse {
    pub id: String,
    pub ip_address: String,
    pub reason: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct BlockedListResponse {
    pub blocked: Vec<BlockedResponse>,
}

impl From<BlockedEntry> for BlockedResponse {
    fn from(entry: BlockedEntry) -> Self {
        Self {
            id: entry.id,
            ip_address: entry.ip_address,
            reason: entry.reason,
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

/// Canonical text form of an address so it matches what the delivery
/// handler sees. Strings that don't parse as an address are kept as given.
pub fn normalize_ip(raw: &str) -> String {
    let raw = raw.trim();
    match raw.parse::<IpAddr>() {
        Ok(addr) => addr.to_canonical().to_string(),
        Err(_) => raw.to_string(),
    }
}

/// POST /api/blocked — Block a client address.
pub async fn block_ip(
    State(state): State<AppState>,
    Json(req): Json<BlockRequest>,
) -> Result<(StatusCode, Json<BlockedResponse>), (StatusCode, String)> {
    let ip_address = normalize_ip(&req.ip_address);
    if ip_address.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "ip_address is required".to_string()));
    }

    let entry = BlockedEntry {
        id: Uuid::now_v7().to_string(),
        ip_address,
        reason: req.reason,
        created_at: Utc::now(),
    };

    let store = state.store.clone();
    let to_insert = entry.clone();
    tokio::task::spawn_blocking(move || store.insert_blocked(&to_insert))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    tracing::info!(ip = %entry.ip_address, reason = %entry.reason, "Address blocked");

    Ok((StatusCode::CREATED, Json(entry.into())))
}

/// GET /api/blocked — List blocked addresses.
pub async fn list_blocked(
    State(state): State<AppState>,
) -> Result<Json<BlockedListResponse>, (StatusCode, String)> {
    let store = state.store.clone();

    let entries = tokio::task::spawn_blocking(move || store.list_blocked())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(Json(BlockedListResponse {
        blocked: entries.into_iter().map(Into::into).collect(),
    }))
}

/// DELETE /api/blocked/{id} — Remove a block list entry.
pub async fn unblock_ip(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let store = state.store.clone();
    let entry_id = id.clone();

    let removed = tokio::task::spawn_blocking(move || store.delete_blocked(&entry_id))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    if !removed {
        return Err((StatusCode::NOT_FOUND, "Block entry not found".to_string()));
    }

    tracing::info!(id = %id, "Address unblocked");
    Ok(StatusCode::NO_CONTENT)
}
