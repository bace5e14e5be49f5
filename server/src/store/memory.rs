//! In-process store on DashMap. Holds nothing across restarts; used by
//! unit tests and by embedders that bring their own persistence.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::db::models::{
    BlockedEntry, EphemeralRoute, LicenseKey, RouteKind, StoredProgram, StoredScript,
};
use crate::store::{Store, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    keys: DashMap<String, LicenseKey>,
    blocked: DashMap<String, BlockedEntry>,
    kill_switch: AtomicBool,
    routes: DashMap<(RouteKind, String), EphemeralRoute>,
    script: RwLock<Option<StoredScript>>,
    program: RwLock<Option<StoredProgram>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of routes still held, expired or not.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

impl Store for MemoryStore {
    fn insert_key(&self, key: &LicenseKey) -> Result<(), StoreError> {
        if self.keys.contains_key(&key.id) || self.keys.iter().any(|k| k.value == key.value) {
            return Err(StoreError::Conflict);
        }
        self.keys.insert(key.id.clone(), key.clone());
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<LicenseKey>, StoreError> {
        let mut keys: Vec<LicenseKey> = self.keys.iter().map(|k| k.value().clone()).collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(keys)
    }

    fn get_key(&self, id: &str) -> Result<Option<LicenseKey>, StoreError> {
        Ok(self.keys.get(id).map(|k| k.value().clone()))
    }

    fn find_key_by_value(&self, value: &str) -> Result<Option<LicenseKey>, StoreError> {
        Ok(self
            .keys
            .iter()
            .find(|k| k.value == value)
            .map(|k| k.value().clone()))
    }

    fn update_key(
        &self,
        id: &str,
        hwid: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        match self.keys.get_mut(id) {
            Some(mut key) => {
                key.hwid = hwid.map(str::to_string);
                key.expires_at = expires_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_key(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.keys.remove(id).is_some())
    }

    fn insert_blocked(&self, entry: &BlockedEntry) -> Result<(), StoreError> {
        if self.blocked.contains_key(&entry.id) {
            return Err(StoreError::Conflict);
        }
        self.blocked.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    fn list_blocked(&self) -> Result<Vec<BlockedEntry>, StoreError> {
        let mut entries: Vec<BlockedEntry> =
            self.blocked.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(entries)
    }

    fn delete_blocked(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.blocked.remove(id).is_some())
    }

    fn find_blocked(&self, ip_address: &str) -> Result<Option<BlockedEntry>, StoreError> {
        Ok(self
            .blocked
            .iter()
            .find(|e| e.ip_address == ip_address)
            .map(|e| e.value().clone()))
    }

    fn kill_switch(&self) -> Result<bool, StoreError> {
        Ok(self.kill_switch.load(Ordering::SeqCst))
    }

    fn set_kill_switch(&self, active: bool) -> Result<(), StoreError> {
        self.kill_switch.store(active, Ordering::SeqCst);
        Ok(())
    }

    fn insert_route(&self, route: &EphemeralRoute) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.routes.entry((route.kind, route.route_name.clone())) {
            Entry::Occupied(_) => Err(StoreError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(route.clone());
                Ok(())
            }
        }
    }

    fn find_route(
        &self,
        kind: RouteKind,
        route_name: &str,
    ) -> Result<Option<EphemeralRoute>, StoreError> {
        Ok(self
            .routes
            .get(&(kind, route_name.to_string()))
            .map(|r| r.value().clone()))
    }

    fn consume_route(&self, kind: RouteKind, route_name: &str) -> Result<bool, StoreError> {
        Ok(self.routes.remove(&(kind, route_name.to_string())).is_some())
    }

    fn script(&self) -> Result<Option<StoredScript>, StoreError> {
        let guard = self.script.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(guard.clone())
    }

    fn save_script(&self, script: &StoredScript) -> Result<(), StoreError> {
        let mut guard = self.script.write().map_err(|_| StoreError::LockPoisoned)?;
        *guard = Some(script.clone());
        Ok(())
    }

    fn program(&self) -> Result<Option<StoredProgram>, StoreError> {
        let guard = self.program.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(guard.clone())
    }

    fn save_program(&self, program: &StoredProgram) -> Result<(), StoreError> {
        let mut guard = self.program.write().map_err(|_| StoreError::LockPoisoned)?;
        *guard = Some(program.clone());
        Ok(())
    }
}
