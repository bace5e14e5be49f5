use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking — no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Access control

CREATE TABLE license_keys (
    id TEXT PRIMARY KEY,
    value TEXT NOT NULL UNIQUE,
    hwid TEXT,
    expires_at TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE blocked_ips (
    id TEXT PRIMARY KEY,
    ip_address TEXT NOT NULL,
    reason TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE INDEX idx_blocked_ips_address ON blocked_ips(ip_address);

CREATE TABLE kill_switch (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    active INTEGER NOT NULL DEFAULT 0
);
",
        ),
        M::up(
            "-- Migration 2: Loader

CREATE TABLE ephemeral_routes (
    kind TEXT NOT NULL,
    route_name TEXT NOT NULL,
    token TEXT NOT NULL,
    created_at TEXT NOT NULL,
    ttl_secs INTEGER NOT NULL DEFAULT 120,
    single_use INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (kind, route_name)
);

CREATE TABLE main_script (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    code TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE vm_program (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    bytecode TEXT NOT NULL,
    instruction_count INTEGER NOT NULL,
    source_hash TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
",
        ),
    ])
}
