use axum::Router;
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::admin::killswitch;
use crate::keys::crud as key_crud;
use crate::loader::{create, deliver, program};
use crate::moderation::blocklist;
use crate::state::AppState;

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Per-IP limiter from the [loader] settings, plus a background task
    // pruning idle entries.
    let replenish_secs = state.loader.rate_limit_replenish_secs.max(1);
    let burst = state.loader.rate_limit_burst.max(1);
    let peer_ip_governor = || {
        let governor_config = Arc::new(
            GovernorConfigBuilder::default()
                .key_extractor(PeerIpKeyExtractor)
                .per_second(replenish_secs)
                .burst_size(burst)
                .finish()
                .expect("Non-zero governor quota"),
        );
        let limiter = governor_config.limiter().clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                limiter.retain_recent();
            }
        });
        governor_config
    };

    // Public delivery endpoints, rate limited per client address.
    // /avm/{route_name} and /{route_name} differ in segment count, and static
    // paths such as /health win over the catch-all parameter.
    let delivery_routes = Router::new()
        .route(
            "/avm/{route_name}",
            axum::routing::get(deliver::deliver_vm),
        )
        .route("/{route_name}", axum::routing::get(deliver::deliver_script))
        .layer(GovernorLayer {
            config: peer_ip_governor(),
        });

    // Route creation shares the limits but not the bucket.
    let creation_routes = Router::new()
        .route(
            "/api/loader/routes",
            axum::routing::post(create::create_route),
        )
        .layer(GovernorLayer {
            config: peer_ip_governor(),
        });

    let key_routes = Router::new()
        .route("/api/keys", axum::routing::get(key_crud::list_keys))
        .route("/api/keys", axum::routing::post(key_crud::create_key))
        .route("/api/keys/{id}", axum::routing::get(key_crud::get_key))
        .route("/api/keys/{id}", axum::routing::put(key_crud::update_key))
        .route("/api/keys/{id}", axum::routing::delete(key_crud::delete_key));

    let blocklist_routes = Router::new()
        .route("/api/blocked", axum::routing::get(blocklist::list_blocked))
        .route("/api/blocked", axum::routing::post(blocklist::block_ip))
        .route(
            "/api/blocked/{id}",
            axum::routing::delete(blocklist::unblock_ip),
        );

    let killswitch_routes = Router::new()
        .route(
            "/api/killswitch",
            axum::routing::get(killswitch::get_kill_switch),
        )
        .route(
            "/api/killswitch",
            axum::routing::put(killswitch::set_kill_switch),
        );

    let program_routes = Router::new()
        .route("/api/loader/script", axum::routing::get(program::get_script))
        .route("/api/loader/script", axum::routing::put(program::put_script))
        .route("/api/loader/vm", axum::routing::get(program::get_program))
        .route("/api/loader/vm", axum::routing::put(program::put_program))
        .route(
            "/api/loader/vm/dry-run",
            axum::routing::post(program::dry_run_program),
        );

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(delivery_routes)
        .merge(creation_routes)
        .merge(key_routes)
        .merge(blocklist_routes)
        .merge(killswitch_routes)
        .merge(program_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
