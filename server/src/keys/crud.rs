use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::db::models::LicenseKey;
use crate::state::AppState;
use crate::store::{Store, StoreError};

const KEY_LENGTH: usize = 16;
const MAX_VALUE_ATTEMPTS: usize = 5;

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    #[serde(default)]
    pub hwid: Option<String>,
    /// Validity in days; absent or <= 0 means the key never expires.
    #[serde(default)]
    pub days: Option<i64>,
}

/// Absent fields keep their current value. An empty hwid clears it and
/// `days <= 0` removes the expiry.
#[derive(Debug, Deserialize)]
pub struct UpdateKeyRequest {
    #[serde(default)]
    pub hwid: Option<String>,
    #[serde(default)]
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct KeyResponse {
    pub id: String,
    pub value: String,
    pub hwid: Option<String>,
    pub expires_at: Option<String>,
    pub days_left: Option<i64>,
    pub expired: bool,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct KeyListResponse {
    pub keys: Vec<KeyResponse>,
}

impl KeyResponse {
    fn from_key(key: LicenseKey, now: DateTime<Utc>) -> Self {
        Self {
            days_left: key.days_left(now),
            expired: key.is_expired(now),
            expires_at: key.expires_at.map(|t| t.to_rfc3339()),
            created_at: key.created_at.to_rfc3339(),
            id: key.id,
            value: key.value,
            hwid: key.hwid,
        }
    }
}

fn generate_key_value() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..KEY_LENGTH)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// `None` or `days <= 0` means no expiry. Values past chrono's range are a 400.
fn expiry_from_days(
    days: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, (StatusCode, String)> {
    let Some(days) = days.filter(|d| *d > 0) else {
        return Ok(None);
    };
    Duration::try_days(days)
        .and_then(|d| now.checked_add_signed(d))
        .map(Some)
        .ok_or((StatusCode::BAD_REQUEST, "days out of range".to_string()))
}

fn non_empty(hwid: Option<String>) -> Option<String> {
    hwid.map(|h| h.trim().to_string()).filter(|h| !h.is_empty())
}

/// Insert a new key with a fresh random value, retrying on value collision.
pub fn issue_key(
    store: &dyn Store,
    hwid: Option<String>,
    days: Option<i64>,
    now: DateTime<Utc>,
) -> Result<LicenseKey, (StatusCode, String)> {
    let hwid = non_empty(hwid);
    let expires_at = expiry_from_days(days, now)?;

    for _ in 0..MAX_VALUE_ATTEMPTS {
        let key = LicenseKey {
            id: uuid::Uuid::now_v7().to_string(),
            value: generate_key_value(),
            hwid: hwid.clone(),
            expires_at,
            created_at: now,
        };
        match store.insert_key(&key) {
            Ok(()) => return Ok(key),
            Err(StoreError::Conflict) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err((
        StatusCode::INTERNAL_SERVER_ERROR,
        "Could not allocate a unique key value".to_string(),
    ))
}

/// POST /api/keys — Issue a new license key.
pub async fn create_key(
    State(state): State<AppState>,
    Json(req): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<KeyResponse>), (StatusCode, String)> {
    let store = state.store.clone();

    let (key, now) = tokio::task::spawn_blocking(move || {
        let now = Utc::now();
        issue_key(store.as_ref(), req.hwid, req.days, now).map(|key| (key, now))
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    tracing::info!(id = %key.id, expires_at = ?key.expires_at, "License key issued");

    Ok((StatusCode::CREATED, Json(KeyResponse::from_key(key, now))))
}

/// GET /api/keys — List all keys, newest first.
pub async fn list_keys(
    State(state): State<AppState>,
) -> Result<Json<KeyListResponse>, (StatusCode, String)> {
    let store = state.store.clone();

    let keys = tokio::task::spawn_blocking(move || store.list_keys())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    let now = Utc::now();
    Ok(Json(KeyListResponse {
        keys: keys
            .into_iter()
            .map(|k| KeyResponse::from_key(k, now))
            .collect(),
    }))
}

/// GET /api/keys/{id}
pub async fn get_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<KeyResponse>, (StatusCode, String)> {
    let store = state.store.clone();

    let key = tokio::task::spawn_blocking(move || store.get_key(&id))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??
        .ok_or((StatusCode::NOT_FOUND, "Key not found".to_string()))?;

    Ok(Json(KeyResponse::from_key(key, Utc::now())))
}

/// PUT /api/keys/{id} — Change hwid and/or validity. Takes effect on the
/// next delivery attempt.
pub async fn update_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateKeyRequest>,
) -> Result<Json<KeyResponse>, (StatusCode, String)> {
    let store = state.store.clone();

    let (key, now) = tokio::task::spawn_blocking(move || {
        let now = Utc::now();
        let mut key = store
            .get_key(&id)?
            .ok_or((StatusCode::NOT_FOUND, "Key not found".to_string()))?;

        if req.hwid.is_some() {
            key.hwid = non_empty(req.hwid);
        }
        if req.days.is_some() {
            key.expires_at = expiry_from_days(req.days, now)?;
        }

        if !store.update_key(&key.id, key.hwid.as_deref(), key.expires_at)? {
            return Err((StatusCode::NOT_FOUND, "Key not found".to_string()));
        }
        Ok::<_, (StatusCode, String)>((key, now))
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    tracing::info!(id = %key.id, expires_at = ?key.expires_at, "License key updated");

    Ok(Json(KeyResponse::from_key(key, now)))
}

/// DELETE /api/keys/{id} — Revoke a key.
pub async fn delete_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let store = state.store.clone();
    let key_id = id.clone();

    let removed = tokio::task::spawn_blocking(move || store.delete_key(&key_id))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    if !removed {
        return Err((StatusCode::NOT_FOUND, "Key not found".to_string()));
    }

    tracing::info!(id = %id, "License key revoked");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_generated_value_shape() {
        let value = generate_key_value();
        assert_eq!(value.len(), KEY_LENGTH);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_issue_key_with_days() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let key = issue_key(&store, Some(" HW-9 ".to_string()), Some(30), now).unwrap();

        assert_eq!(key.hwid.as_deref(), Some("HW-9"));
        assert_eq!(key.expires_at, Some(now + Duration::days(30)));
        assert_eq!(key.days_left(now), Some(30));
        assert_eq!(store.find_key_by_value(&key.value).unwrap(), Some(key));
    }

    #[test]
    fn test_non_positive_days_never_expire() {
        let now = Utc::now();
        assert_eq!(expiry_from_days(None, now), Ok(None));
        assert_eq!(expiry_from_days(Some(0), now), Ok(None));
        assert_eq!(expiry_from_days(Some(-3), now), Ok(None));
        assert_eq!(expiry_from_days(Some(i64::MIN), now), Ok(None));
    }

    #[test]
    fn test_huge_days_are_rejected() {
        let store = MemoryStore::new();
        let now = Utc::now();

        for days in [100_000_000, i64::MAX] {
            let err = expiry_from_days(Some(days), now).unwrap_err();
            assert_eq!(err.0, StatusCode::BAD_REQUEST);
        }

        let err = issue_key(&store, None, Some(100_000_000), now).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(store.list_keys().unwrap().is_empty());
    }

    #[test]
    fn test_empty_hwid_is_none() {
        assert_eq!(non_empty(Some("".to_string())), None);
        assert_eq!(non_empty(Some("   ".to_string())), None);
        assert_eq!(non_empty(None), None);
    }
}
