//! Catalog (Store) — §3, §4.3.
//!
//! The metadata database: `backups`, `blocks`, `positions`. Backed by an
//! embedded SQLite connection (`rusqlite`, bundled) at a fixed path, per
//! §6's "embedded SQL database at a fixed path." `Catalog` owns exactly one
//! `rusqlite::Connection` — §5 assigns the catalog exclusively to the
//! consumer task, so there is never a need for interior mutability or an
//! `Arc<Mutex<_>>` here the same single-owner discipline the reference
//! codebase applies to its own writer types.

mod schema;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::CatalogError;
use crate::hashing::BlockHash;

/// §2/§3: a backup is labeled by the planner at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupType {
    Full,
    Differential,
}

impl BackupType {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Differential => "differential",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(BackupType::Full),
            "differential" => Ok(BackupType::Differential),
            other => Err(format!("unknown backup_type {other}")),
        }
    }
}

/// A `backups` row (§3).
#[derive(Debug, Clone)]
pub struct BackupRow {
    pub id: i64,
    pub device_path: String,
    pub backup_type: BackupType,
    pub block_size: u64,
    pub total_blocks: u64,
    pub size_in_bytes: u64,
    pub created_at: String,
    pub completed_at: Option<String>,
}

pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open (creating if absent) the catalog at `path`, applying the DDL in
    /// [`schema::DDL`]. Sets WAL mode and foreign-key enforcement, and runs
    /// with `synchronous = FULL` so a completed-backup marker is durable
    /// across a crash immediately after `FinalizeBackup` commits (§4.3, §9).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = FULL;",
        )?;
        conn.execute_batch(schema::DDL)?;
        Ok(Self { conn })
    }

    /// In-memory catalog, used by tests that don't need a file on disk.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(schema::DDL)?;
        Ok(Self { conn })
    }

    /// `CreateBackup(device_path, type, block_size) -> backup_id` (§4.3).
    ///
    /// Enforces the single-active-backup-per-device policy (§5, §7.5): the
    /// existence check and the insert run in one transaction, so the
    /// predicate "no backup for this device lacks `completed_at`" acts as
    /// an advisory row-lock without a separate lock table. The transaction
    /// is opened `Immediate` rather than the default `Deferred` so the
    /// existence check takes a RESERVED lock up front — a `Deferred`
    /// transaction only takes a SHARED lock on the initial SELECT, letting
    /// two connections both pass the check before either commits its
    /// INSERT, which would admit two uncompleted Backup rows for the same
    /// device.
    pub fn create_backup(
        &mut self,
        device_path: &str,
        backup_type: BackupType,
        block_size: u64,
    ) -> Result<i64, CatalogError> {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let in_progress: Option<i64> = tx
            .query_row(
                "SELECT id FROM backups WHERE device_path = ?1 AND completed_at IS NULL",
                params![device_path],
                |row| row.get(0),
            )
            .optional()?;
        if in_progress.is_some() {
            // tx drops here without commit — no partial row is left behind.
            return Err(CatalogError::ConcurrentBackup {
                device_path: device_path.to_owned(),
            });
        }

        tx.execute(
            "INSERT INTO backups (device_path, backup_type, block_size, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![device_path, backup_type.as_str(), block_size as i64, now()],
        )?;
        let backup_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(backup_id)
    }

    /// `LatestCompletedBackup(device_path) -> backup_id?` (§4.3, §4.4).
    pub fn latest_completed_backup(&self, device_path: &str) -> Result<Option<i64>, CatalogError> {
        self.conn
            .query_row(
                "SELECT id FROM backups
                 WHERE device_path = ?1 AND completed_at IS NOT NULL
                 ORDER BY id DESC LIMIT 1",
                params![device_path],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// `TotalDistinctBlocks() -> count` (§4.3, §8).
    pub fn total_distinct_blocks(&self) -> Result<u64, CatalogError> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// `FindPositionsByBackup(backup_id) -> [(position_index, hash)]` (§4.3),
    /// ordered by `position_index`. Used by `restore` and by the `list` CLI.
    pub fn find_positions_by_backup(&self, backup_id: i64) -> Result<Vec<(u64, BlockHash)>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.position_index, b.hash
             FROM positions p JOIN blocks b ON b.id = p.block_id
             WHERE p.backup_id = ?1
             ORDER BY p.position_index",
        )?;
        let rows = stmt.query_map(params![backup_id], |row| {
            let idx: i64 = row.get(0)?;
            let hash_bytes: Vec<u8> = row.get(1)?;
            Ok((idx, hash_bytes))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (idx, hash_bytes) = row?;
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&hash_bytes);
            out.push((idx as u64, BlockHash(arr)));
        }
        Ok(out)
    }

    /// Fetch one `backups` row by id, for the `list`/`info` CLI surface.
    pub fn backup_row(&self, backup_id: i64) -> Result<BackupRow, CatalogError> {
        self.conn
            .query_row(
                "SELECT id, device_path, backup_type, block_size, total_blocks,
                        size_in_bytes, created_at, completed_at
                 FROM backups WHERE id = ?1",
                params![backup_id],
                |row| {
                    let backup_type: String = row.get(2)?;
                    Ok(BackupRow {
                        id: row.get(0)?,
                        device_path: row.get(1)?,
                        backup_type: BackupType::from_str(&backup_type).unwrap_or(BackupType::Full),
                        block_size: row.get::<_, i64>(3)? as u64,
                        total_blocks: row.get::<_, i64>(4)? as u64,
                        size_in_bytes: row.get::<_, i64>(5)? as u64,
                        created_at: row.get(6)?,
                        completed_at: row.get(7)?,
                    })
                },
            )
            .optional()?
            .ok_or(CatalogError::UnknownBackup(backup_id))
    }

    /// List every backup row for a device, most recent first.
    pub fn backups_for_device(&self, device_path: &str) -> Result<Vec<BackupRow>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, device_path, backup_type, block_size, total_blocks,
                    size_in_bytes, created_at, completed_at
             FROM backups WHERE device_path = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![device_path], |row| {
            let backup_type: String = row.get(2)?;
            Ok(BackupRow {
                id: row.get(0)?,
                device_path: row.get(1)?,
                backup_type: BackupType::from_str(&backup_type).unwrap_or(BackupType::Full),
                block_size: row.get::<_, i64>(3)? as u64,
                total_blocks: row.get::<_, i64>(4)? as u64,
                size_in_bytes: row.get::<_, i64>(5)? as u64,
                created_at: row.get(6)?,
                completed_at: row.get(7)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Every distinct hash referenced by any completed backup's positions,
    /// used by [`crate::gc::sweep_orphans`].
    pub fn all_referenced_hashes(&self) -> Result<Vec<BlockHash>, CatalogError> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT hash FROM blocks")?;
        let rows = stmt.query_map([], |row| {
            let hash_bytes: Vec<u8> = row.get(0)?;
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&hash_bytes);
            Ok(BlockHash(arr))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Begin the single writer transaction for one backup run (§4.6). The
    /// caller drives [`upsert_block`], [`insert_position`], and
    /// [`finalize_backup`] against the returned transaction, then either
    /// commits (full success) or lets it drop (abort/cancellation — rolled
    /// back automatically, per §7's "no intermediate visible state").
    pub fn begin_backup_transaction(&mut self) -> Result<rusqlite::Transaction<'_>, CatalogError> {
        Ok(self.conn.transaction()?)
    }
}

/// `UpsertBlock(hash, size) -> (block_id, was_new)` (§4.3, §4.6, §9).
///
/// Implemented as the insert-ignore-then-select pattern §9 prescribes: the
/// unique index on `blocks(hash)` is the sole correctness anchor.
pub fn upsert_block(
    tx: &rusqlite::Transaction<'_>,
    hash: &BlockHash,
    size: u64,
) -> Result<(i64, bool), CatalogError> {
    let changed = tx.execute(
        "INSERT INTO blocks (hash, size) VALUES (?1, ?2)
         ON CONFLICT(hash) DO NOTHING",
        params![hash.as_bytes().to_vec(), size as i64],
    )?;
    let was_new = changed > 0;
    let block_id: i64 = tx.query_row(
        "SELECT id FROM blocks WHERE hash = ?1",
        params![hash.as_bytes().to_vec()],
        |row| row.get(0),
    )?;
    Ok((block_id, was_new))
}

/// `InsertPosition(backup_id, position_index, block_id)` (§4.3, §4.6).
///
/// A conflict on `(backup_id, position_index)` surfaces as a plain
/// `rusqlite::Error` (constraint violation) and is treated by the caller as
/// an [`crate::error::BackupError::Integrity`] bug signal, never retried —
/// §4.3's "constraint violation ... is a fatal bug signal."
pub fn insert_position(
    tx: &rusqlite::Transaction<'_>,
    backup_id: i64,
    position_index: u64,
    block_id: i64,
) -> Result<(), CatalogError> {
    tx.execute(
        "INSERT INTO positions (backup_id, position_index, block_id) VALUES (?1, ?2, ?3)",
        params![backup_id, position_index as i64, block_id],
    )?;
    Ok(())
}

/// `FinalizeBackup(backup_id, total_blocks, size_in_bytes)` (§4.3, §4.6).
///
/// Sets `completed_at` atomically with the final counts, in the same
/// transaction as the last `InsertPosition` call — §3's "completed_at is
/// set atomically with the final position insertion."
pub fn finalize_backup(
    tx: &rusqlite::Transaction<'_>,
    backup_id: i64,
    total_blocks: u64,
    size_in_bytes: u64,
) -> Result<(), CatalogError> {
    tx.execute(
        "UPDATE backups SET total_blocks = ?2, size_in_bytes = ?3, completed_at = ?4 WHERE id = ?1",
        params![backup_id, total_blocks as i64, size_in_bytes as i64, now()],
    )?;
    Ok(())
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_backup_rejects_concurrent_same_device() {
        let mut cat = Catalog::open_in_memory().unwrap();
        cat.create_backup("/dev/sda", BackupType::Full, 4096).unwrap();
        let err = cat.create_backup("/dev/sda", BackupType::Full, 4096).unwrap_err();
        assert!(matches!(err, CatalogError::ConcurrentBackup { .. }));
    }

    #[test]
    fn create_backup_allows_different_devices() {
        let mut cat = Catalog::open_in_memory().unwrap();
        cat.create_backup("/dev/sda", BackupType::Full, 4096).unwrap();
        assert!(cat.create_backup("/dev/sdb", BackupType::Full, 4096).is_ok());
    }

    #[test]
    fn latest_completed_backup_ignores_aborted_runs() {
        let mut cat = Catalog::open_in_memory().unwrap();
        let id = cat.create_backup("/dev/sda", BackupType::Full, 4096).unwrap();
        assert_eq!(cat.latest_completed_backup("/dev/sda").unwrap(), None);

        {
            let tx = cat.begin_backup_transaction().unwrap();
            finalize_backup(&tx, id, 0, 0).unwrap();
            tx.commit().unwrap();
        }
        assert_eq!(cat.latest_completed_backup("/dev/sda").unwrap(), Some(id));
    }

    #[test]
    fn upsert_block_is_idempotent() {
        let mut cat = Catalog::open_in_memory().unwrap();
        let hash = crate::hashing::hash_block(b"payload");
        let tx = cat.begin_backup_transaction().unwrap();
        let (id1, new1) = upsert_block(&tx, &hash, 7).unwrap();
        let (id2, new2) = upsert_block(&tx, &hash, 7).unwrap();
        assert_eq!(id1, id2);
        assert!(new1);
        assert!(!new2);
        tx.commit().unwrap();
        assert_eq!(cat.total_distinct_blocks().unwrap(), 1);
    }

    #[test]
    fn a_failed_transaction_leaves_no_trace() {
        let mut cat = Catalog::open_in_memory().unwrap();
        let id = cat.create_backup("/dev/sda", BackupType::Full, 4096).unwrap();
        {
            let tx = cat.begin_backup_transaction().unwrap();
            let hash = crate::hashing::hash_block(b"x");
            let (block_id, _) = upsert_block(&tx, &hash, 1).unwrap();
            insert_position(&tx, id, 0, block_id).unwrap();
            // tx dropped without commit — simulates cancellation/abort.
        }
        assert_eq!(cat.find_positions_by_backup(id).unwrap().len(), 0);
        assert_eq!(cat.latest_completed_backup("/dev/sda").unwrap(), None);
    }
}
