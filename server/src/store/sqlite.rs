//! SQLite-backed store over the shared connection.

use chrono::{DateTime, Utc};
use rusqlite::{ErrorCode, OptionalExtension, Row};

use crate::db::models::{
    BlockedEntry, EphemeralRoute, LicenseKey, RouteKind, StoredProgram, StoredScript,
};
use crate::db::DbPool;
use crate::store::{Store, StoreError};

#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

/// Map unique/primary key violations to `Conflict`.
fn conflict_or(e: rusqlite::Error) -> StoreError {
    match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StoreError::Conflict,
        _ => StoreError::Sqlite(e),
    }
}

fn key_from_row(row: &Row<'_>) -> rusqlite::Result<LicenseKey> {
    Ok(LicenseKey {
        id: row.get(0)?,
        value: row.get(1)?,
        hwid: row.get(2)?,
        expires_at: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn blocked_from_row(row: &Row<'_>) -> rusqlite::Result<BlockedEntry> {
    Ok(BlockedEntry {
        id: row.get(0)?,
        ip_address: row.get(1)?,
        reason: row.get(2)?,
        created_at: row.get(3)?,
    })
}

const KEY_COLUMNS: &str = "id, value, hwid, expires_at, created_at";
const BLOCKED_COLUMNS: &str = "id, ip_address, reason, created_at";

impl Store for SqliteStore {
    fn insert_key(&self, key: &LicenseKey) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO license_keys (id, value, hwid, expires_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![key.id, key.value, key.hwid, key.expires_at, key.created_at],
        )
        .map_err(conflict_or)?;
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<LicenseKey>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM license_keys ORDER BY created_at DESC, id DESC",
            KEY_COLUMNS
        ))?;
        let keys = stmt
            .query_map([], key_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn get_key(&self, id: &str) -> Result<Option<LicenseKey>, StoreError> {
        let conn = self.conn()?;
        let key = conn
            .query_row(
                &format!("SELECT {} FROM license_keys WHERE id = ?1", KEY_COLUMNS),
                [id],
                key_from_row,
            )
            .optional()?;
        Ok(key)
    }

    fn find_key_by_value(&self, value: &str) -> Result<Option<LicenseKey>, StoreError> {
        let conn = self.conn()?;
        let key = conn
            .query_row(
                &format!("SELECT {} FROM license_keys WHERE value = ?1", KEY_COLUMNS),
                [value],
                key_from_row,
            )
            .optional()?;
        Ok(key)
    }

    fn update_key(
        &self,
        id: &str,
        hwid: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE license_keys SET hwid = ?1, expires_at = ?2 WHERE id = ?3",
            rusqlite::params![hwid, expires_at, id],
        )?;
        Ok(rows > 0)
    }

    fn delete_key(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM license_keys WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    fn insert_blocked(&self, entry: &BlockedEntry) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO blocked_ips (id, ip_address, reason, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![entry.id, entry.ip_address, entry.reason, entry.created_at],
        )
        .map_err(conflict_or)?;
        Ok(())
    }

    fn list_blocked(&self) -> Result<Vec<BlockedEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM blocked_ips ORDER BY created_at DESC, id DESC",
            BLOCKED_COLUMNS
        ))?;
        let entries = stmt
            .query_map([], blocked_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn delete_blocked(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM blocked_ips WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    fn find_blocked(&self, ip_address: &str) -> Result<Option<BlockedEntry>, StoreError> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {} FROM blocked_ips WHERE ip_address = ?1 LIMIT 1",
                    BLOCKED_COLUMNS
                ),
                [ip_address],
                blocked_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn kill_switch(&self) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let active = conn
            .query_row("SELECT active FROM kill_switch WHERE id = 1", [], |row| {
                row.get::<_, bool>(0)
            })
            .optional()?;
        Ok(active.unwrap_or(false))
    }

    fn set_kill_switch(&self, active: bool) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kill_switch (id, active) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET active = excluded.active",
            [active],
        )?;
        Ok(())
    }

    fn insert_route(&self, route: &EphemeralRoute) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO ephemeral_routes (kind, route_name, token, created_at, ttl_secs, single_use) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                route.kind.as_str(),
                route.route_name,
                route.token,
                route.created_at,
                route.ttl_secs,
                route.single_use,
            ],
        )
        .map_err(conflict_or)?;
        Ok(())
    }

    fn find_route(
        &self,
        kind: RouteKind,
        route_name: &str,
    ) -> Result<Option<EphemeralRoute>, StoreError> {
        let conn = self.conn()?;
        let route = conn
            .query_row(
                "SELECT route_name, token, created_at, ttl_secs, single_use FROM ephemeral_routes WHERE kind = ?1 AND route_name = ?2",
                [kind.as_str(), route_name],
                |row| {
                    Ok(EphemeralRoute {
                        kind,
                        route_name: row.get(0)?,
                        token: row.get(1)?,
                        created_at: row.get(2)?,
                        ttl_secs: row.get(3)?,
                        single_use: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(route)
    }

    fn consume_route(&self, kind: RouteKind, route_name: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM ephemeral_routes WHERE kind = ?1 AND route_name = ?2",
            [kind.as_str(), route_name],
        )?;
        Ok(rows == 1)
    }

    fn script(&self) -> Result<Option<StoredScript>, StoreError> {
        let conn = self.conn()?;
        let script = conn
            .query_row(
                "SELECT code, updated_at FROM main_script WHERE id = 1",
                [],
                |row| {
                    Ok(StoredScript {
                        code: row.get(0)?,
                        updated_at: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(script)
    }

    fn save_script(&self, script: &StoredScript) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO main_script (id, code, updated_at) VALUES (1, ?1, ?2)",
            rusqlite::params![script.code, script.updated_at],
        )?;
        Ok(())
    }

    fn program(&self) -> Result<Option<StoredProgram>, StoreError> {
        let conn = self.conn()?;
        let program = conn
            .query_row(
                "SELECT bytecode, instruction_count, source_hash, updated_at FROM vm_program WHERE id = 1",
                [],
                |row| {
                    Ok(StoredProgram {
                        bytecode: row.get(0)?,
                        instruction_count: row.get(1)?,
                        source_hash: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(program)
    }

    fn save_program(&self, program: &StoredProgram) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO vm_program (id, bytecode, instruction_count, source_hash, updated_at) VALUES (1, ?1, ?2, ?3, ?4)",
            rusqlite::params![
                program.bytecode,
                program.instruction_count,
                program.source_hash,
                program.updated_at,
            ],
        )?;
        Ok(())
    }
}
