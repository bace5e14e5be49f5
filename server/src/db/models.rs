//! Record types shared by every store implementation.
//! These correspond 1:1 to the SQLite schema defined in migrations.rs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// License key consulted by the delivery gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LicenseKey {
    pub id: String,
    pub value: String,
    /// Hardware id the key was issued for. Stored and shown, never enforced.
    pub hwid: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LicenseKey {
    /// A key with no expiry never expires. Expiry is a comparison, not a deletion.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }

    /// Whole days until expiry, clamped at zero. `None` when the key never expires.
    pub fn days_left(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at
            .map(|exp| (exp - now).num_days().max(0))
    }
}

/// Blocked client address
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockedEntry {
    pub id: String,
    pub ip_address: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Which stored program an ephemeral route delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    /// Raw script, run directly by the client.
    Script,
    /// Compiled instruction string, run by the embedded VM.
    Vm,
}

impl RouteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteKind::Script => "script",
            RouteKind::Vm => "vm",
        }
    }

    pub fn parse(s: &str) -> Option<RouteKind> {
        match s {
            "script" => Some(RouteKind::Script),
            "vm" => Some(RouteKind::Vm),
            _ => None,
        }
    }

    /// Public path a route of this kind is served under.
    pub fn path(self, route_name: &str) -> String {
        match self {
            RouteKind::Script => format!("/{}", route_name),
            RouteKind::Vm => format!("/avm/{}", route_name),
        }
    }
}

/// Short-lived delivery route bound to one token.
#[derive(Debug, Clone, PartialEq)]
pub struct EphemeralRoute {
    pub kind: RouteKind,
    pub route_name: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: i64,
    pub single_use: bool,
}

impl EphemeralRoute {
    /// Lazy TTL check: expired once strictly more than `ttl_secs` have passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::seconds(self.ttl_secs)
    }
}

/// Raw script served by the direct loader variant (singleton row).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredScript {
    pub code: String,
    pub updated_at: DateTime<Utc>,
}

/// Compiled program served by the VM loader variant (singleton row).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredProgram {
    pub bytecode: String,
    pub instruction_count: i64,
    pub source_hash: String,
    pub updated_at: DateTime<Utc>,
}
