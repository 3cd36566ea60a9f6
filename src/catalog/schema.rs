//! Catalog DDL — §3 "Schema realization".
//!
//! Applied once via `execute_batch` on every [`super::Catalog::open`]. Uses
//! `IF NOT EXISTS` throughout so opening an existing catalog file is a no-op
//! migration, matching the reference codebase's superblock/index pattern of
//! "write once, read idempotently" rather than a versioned migration chain —
//! there is exactly one schema version in this crate.

pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS backups (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    device_path   TEXT    NOT NULL,
    backup_type   TEXT    NOT NULL CHECK (backup_type IN ('full', 'differential')),
    block_size    INTEGER NOT NULL,
    total_blocks  INTEGER NOT NULL DEFAULT 0,
    size_in_bytes INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT    NOT NULL,
    completed_at  TEXT
);

CREATE TABLE IF NOT EXISTS blocks (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    hash BLOB    NOT NULL,
    size INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_blocks_hash ON blocks(hash);

CREATE TABLE IF NOT EXISTS positions (
    backup_id      INTEGER NOT NULL REFERENCES backups(id),
    position_index INTEGER NOT NULL,
    block_id       INTEGER NOT NULL REFERENCES blocks(id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_positions_backup_pos
    ON positions(backup_id, position_index);
CREATE INDEX IF NOT EXISTS idx_positions_backup ON positions(backup_id);
"#;
