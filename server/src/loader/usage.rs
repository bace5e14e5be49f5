//! Per-attempt usage log for delivery routes.

use crate::db::models::RouteKind;

/// Record one delivery attempt. Suspicious attempts are warnings, clean
/// deliveries are info.
pub fn log_usage(kind: RouteKind, route: &str, ip: &str, suspicious: bool) {
    if suspicious {
        tracing::warn!(
            kind = kind.as_str(),
            route,
            ip,
            suspicious,
            "Loader usage"
        );
    } else {
        tracing::info!(
            kind = kind.as_str(),
            route,
            ip,
            suspicious,
            "Loader usage"
        );
    }
}
