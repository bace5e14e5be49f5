//! Store interface consulted by handlers and the delivery gate.
//!
//! Every call reads or writes the backing store directly; nothing is cached
//! across requests. Implementations are synchronous and are called from
//! `spawn_blocking` on the async side.

pub mod memory;
pub mod sqlite;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};

use crate::db::models::{
    BlockedEntry, EphemeralRoute, LicenseKey, RouteKind, StoredProgram, StoredScript,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("record already exists")]
    Conflict,
}

impl From<StoreError> for (StatusCode, String) {
    fn from(e: StoreError) -> Self {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Store: {}", e))
    }
}

pub trait Store: Send + Sync {
    // --- License keys ---
    fn insert_key(&self, key: &LicenseKey) -> Result<(), StoreError>;
    /// Newest first.
    fn list_keys(&self) -> Result<Vec<LicenseKey>, StoreError>;
    fn get_key(&self, id: &str) -> Result<Option<LicenseKey>, StoreError>;
    fn find_key_by_value(&self, value: &str) -> Result<Option<LicenseKey>, StoreError>;
    /// Replace hwid and expiry. Returns false if no key has this id.
    fn update_key(
        &self,
        id: &str,
        hwid: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;
    fn delete_key(&self, id: &str) -> Result<bool, StoreError>;

    // --- Block list ---
    fn insert_blocked(&self, entry: &BlockedEntry) -> Result<(), StoreError>;
    fn list_blocked(&self) -> Result<Vec<BlockedEntry>, StoreError>;
    fn delete_blocked(&self, id: &str) -> Result<bool, StoreError>;
    /// Exact address match.
    fn find_blocked(&self, ip_address: &str) -> Result<Option<BlockedEntry>, StoreError>;

    // --- Kill switch ---
    /// Defaults to inactive when never set.
    fn kill_switch(&self) -> Result<bool, StoreError>;
    fn set_kill_switch(&self, active: bool) -> Result<(), StoreError>;

    // --- Ephemeral routes ---
    /// Fails with `Conflict` if `(kind, route_name)` is taken.
    fn insert_route(&self, route: &EphemeralRoute) -> Result<(), StoreError>;
    fn find_route(
        &self,
        kind: RouteKind,
        route_name: &str,
    ) -> Result<Option<EphemeralRoute>, StoreError>;
    /// Atomically delete the route. Returns true only for the caller that
    /// actually removed it.
    fn consume_route(&self, kind: RouteKind, route_name: &str) -> Result<bool, StoreError>;

    // --- Stored programs ---
    fn script(&self) -> Result<Option<StoredScript>, StoreError>;
    fn save_script(&self, script: &StoredScript) -> Result<(), StoreError>;
    fn program(&self) -> Result<Option<StoredProgram>, StoreError>;
    fn save_program(&self, program: &StoredProgram) -> Result<(), StoreError>;
}
