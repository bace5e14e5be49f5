//! Public delivery endpoints.
//!
//! GET /{route_name}?key=&hwid=&token=      — direct variant (raw script)
//! GET /avm/{route_name}?key=&hwid=&token=  — VM variant (compiled program)
//!
//! Bodies are plain text: the wrapped stub on success, a short reason otherwise.

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use std::net::SocketAddr;

use crate::db::models::RouteKind;
use crate::loader::gate::{DeliveryGate, DeliveryRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeliveryParams {
    pub key: Option<String>,
    pub hwid: Option<String>,
    pub token: Option<String>,
}

/// GET /{route_name}
pub async fn deliver_script(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(route_name): Path<String>,
    Query(params): Query<DeliveryParams>,
) -> Result<String, (StatusCode, String)> {
    deliver(state, RouteKind::Script, route_name, addr, params).await
}

/// GET /avm/{route_name}
pub async fn deliver_vm(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(route_name): Path<String>,
    Query(params): Query<DeliveryParams>,
) -> Result<String, (StatusCode, String)> {
    deliver(state, RouteKind::Vm, route_name, addr, params).await
}

async fn deliver(
    state: AppState,
    kind: RouteKind,
    route_name: String,
    addr: SocketAddr,
    params: DeliveryParams,
) -> Result<String, (StatusCode, String)> {
    let req = DeliveryRequest {
        kind,
        route_name,
        // Dual-stack listeners report IPv4 peers as ::ffff:a.b.c.d
        client_ip: addr.ip().to_canonical().to_string(),
        key: params.key,
        hwid: params.hwid,
        token: params.token,
    };

    let delivery = tokio::task::spawn_blocking(move || {
        let gate = DeliveryGate::new(
            state.store.as_ref(),
            state.probe.as_ref(),
            state.wrapper.as_ref(),
        );
        gate.deliver(&req, Utc::now())
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    Ok(delivery.body)
}
