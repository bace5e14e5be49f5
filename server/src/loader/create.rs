use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::LoaderConfig;
use crate::db::models::{EphemeralRoute, RouteKind};
use crate::loader::environment::EnvironmentProbe;
use crate::state::AppState;
use crate::store::{Store, StoreError};

/// Attempts at finding an unused route name before giving up.
const MAX_NAME_ATTEMPTS: usize = 5;

#[derive(Debug, Deserialize)]
pub struct CreateRouteRequest {
    #[serde(default = "default_kind")]
    pub kind: RouteKind,
}

fn default_kind() -> RouteKind {
    RouteKind::Script
}

#[derive(Debug, Serialize)]
pub struct RouteCreatedResponse {
    pub kind: RouteKind,
    pub route_name: String,
    pub token: String,
    pub path: String,
    /// Full access URL with placeholders for the caller's key and hwid.
    pub url: String,
    pub expires_in: i64,
    pub single_use: bool,
}

/// Single-segment paths owned by other routes; `/{route_name}` would never
/// be reached under these names.
const RESERVED_ROUTE_NAMES: &[&str] = &["health", "avm", "api"];

fn is_reserved(name: &str) -> bool {
    RESERVED_ROUTE_NAMES.contains(&name)
}

/// Generate an alphanumeric route name that does not collide with a static path.
fn generate_route_name(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    loop {
        let name: String = (0..len)
            .map(|_| {
                let idx = rng.random_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect();
        if !is_reserved(&name) {
            return name;
        }
    }
}

/// 128-bit random access token, hex-encoded.
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// Build the access URL handed to the operator.
pub fn access_url(base_url: &str, route: &EphemeralRoute) -> String {
    format!(
        "{}{}?key=YOUR_KEY&hwid=YOUR_HWID&token={}",
        base_url.trim_end_matches('/'),
        route.kind.path(&route.route_name),
        route.token
    )
}

/// Create and persist a fresh single-use route of `kind`.
///
/// Refused when nothing is stored for that kind, or when the environment
/// probe trips.
pub fn issue_route(
    store: &dyn Store,
    probe: &dyn EnvironmentProbe,
    config: &LoaderConfig,
    kind: RouteKind,
    now: DateTime<Utc>,
) -> Result<EphemeralRoute, (StatusCode, String)> {
    let has_program = match kind {
        RouteKind::Script => store.script()?.is_some(),
        RouteKind::Vm => store.program()?.is_some(),
    };
    if !has_program {
        let hint = match kind {
            RouteKind::Script => "No main script found. Upload one via PUT /api/loader/script",
            RouteKind::Vm => "No VM program compiled. Compile one via PUT /api/loader/vm",
        };
        return Err((StatusCode::NOT_FOUND, hint.to_string()));
    }

    if probe.is_suspicious() {
        return Err((
            StatusCode::FORBIDDEN,
            "Suspicious environment. Aborting ephemeral route creation.".to_string(),
        ));
    }

    if config.route_name_length == 0 {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "route_name_length must be at least 1".to_string(),
        ));
    }

    let token = generate_token();
    for _ in 0..MAX_NAME_ATTEMPTS {
        let route = EphemeralRoute {
            kind,
            route_name: generate_route_name(config.route_name_length),
            token: token.clone(),
            created_at: now,
            ttl_secs: config.route_ttl_secs,
            single_use: true,
        };
        match store.insert_route(&route) {
            Ok(()) => return Ok(route),
            Err(StoreError::Conflict) => {
                tracing::debug!("Route name {} taken, retrying", route.route_name);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err((
        StatusCode::INTERNAL_SERVER_ERROR,
        "Could not allocate a unique route name".to_string(),
    ))
}

/// POST /api/loader/routes — Create an ephemeral delivery route.
pub async fn create_route(
    State(state): State<AppState>,
    Json(req): Json<CreateRouteRequest>,
) -> Result<(StatusCode, Json<RouteCreatedResponse>), (StatusCode, String)> {
    let store = state.store.clone();
    let probe = state.probe.clone();
    let config = state.loader.clone();
    let kind = req.kind;

    let route = tokio::task::spawn_blocking(move || {
        issue_route(store.as_ref(), probe.as_ref(), &config, kind, Utc::now())
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    tracing::info!(
        kind = route.kind.as_str(),
        route = %route.route_name,
        ttl = route.ttl_secs,
        "Ephemeral route created"
    );

    Ok((
        StatusCode::CREATED,
        Json(RouteCreatedResponse {
            kind: route.kind,
            path: route.kind.path(&route.route_name),
            url: access_url(&state.loader.public_base_url, &route),
            route_name: route.route_name,
            token: route.token,
            expires_in: route.ttl_secs,
            single_use: route.single_use,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::StoredScript;
    use crate::loader::environment::StaticProbe;
    use crate::store::MemoryStore;

    fn store_with_script() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .save_script(&StoredScript {
                code: "print(1)".to_string(),
                updated_at: Utc::now(),
            })
            .unwrap();
        store
    }

    #[test]
    fn test_issue_route_defaults() {
        let store = store_with_script();
        let config = LoaderConfig::default();
        let route = issue_route(&store, &StaticProbe(false), &config, RouteKind::Script, Utc::now())
            .unwrap();

        assert_eq!(route.route_name.len(), 8);
        assert!(route.route_name.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(route.token.len(), 32);
        assert_eq!(route.ttl_secs, 120);
        assert!(route.single_use);
        assert!(store
            .find_route(RouteKind::Script, &route.route_name)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_issue_route_requires_program() {
        let store = store_with_script();
        let config = LoaderConfig::default();
        let err = issue_route(&store, &StaticProbe(false), &config, RouteKind::Vm, Utc::now())
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_issue_route_refused_in_suspicious_environment() {
        let store = store_with_script();
        let config = LoaderConfig::default();
        let err = issue_route(&store, &StaticProbe(true), &config, RouteKind::Script, Utc::now())
            .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
        assert_eq!(store.route_count(), 0);
    }

    #[test]
    fn test_reserved_names_are_skipped() {
        assert!(is_reserved("health"));
        assert!(is_reserved("avm"));
        assert!(!is_reserved("Health"));
        // Three-letter names hit "avm"/"api" often enough to exercise the retry.
        for _ in 0..2000 {
            let name = generate_route_name(3);
            assert_eq!(name.len(), 3);
            assert!(!is_reserved(&name));
        }
    }

    #[test]
    fn test_zero_length_names_are_refused() {
        let store = store_with_script();
        let config = LoaderConfig {
            route_name_length: 0,
            ..LoaderConfig::default()
        };
        let err = issue_route(&store, &StaticProbe(false), &config, RouteKind::Script, Utc::now())
            .unwrap_err();
        assert_eq!(err.0, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(store.route_count(), 0);
    }

    #[test]
    fn test_access_url() {
        let route = EphemeralRoute {
            kind: RouteKind::Vm,
            route_name: "AbCd1234".to_string(),
            token: "ff00".to_string(),
            created_at: Utc::now(),
            ttl_secs: 120,
            single_use: true,
        };
        assert_eq!(
            access_url("https://hub.example/", &route),
            "https://hub.example/avm/AbCd1234?key=YOUR_KEY&hwid=YOUR_HWID&token=ff00"
        );
        assert_eq!(
            access_url("", &route),
            "/avm/AbCd1234?key=YOUR_KEY&hwid=YOUR_HWID&token=ff00"
        );
    }
}
