//! Restore — §1, §8 (ambient, thin).
//!
//! The inverse of a backup run: concatenate a backup's block payloads in
//! position order and truncate to the recorded size. Deliberately minimal —
//! no partial restore, no progress reporting, no parallel extraction.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::catalog::Catalog;
use crate::error::{BackupError, CatalogError};
use crate::sink::Sink;

/// Reconstruct `backup_id`'s original bytes from `sink` into `out_path`,
/// truncated to the backup's recorded `size_in_bytes` (§8's round-trip
/// property).
pub fn reconstruct_into(
    catalog: &Catalog,
    backup_id: i64,
    sink: &dyn Sink,
    out_path: &Path,
) -> Result<u64, BackupError> {
    let row = catalog.backup_row(backup_id).map_err(BackupError::Catalog)?;
    let positions = catalog
        .find_positions_by_backup(backup_id)
        .map_err(BackupError::Catalog)?;

    let mut out = File::create(out_path).map_err(BackupError::Sink)?;
    let mut written: u64 = 0;

    for (_position_index, hash) in &positions {
        let bytes = sink.read_block(hash).map_err(BackupError::Sink)?;
        let remaining = row.size_in_bytes.saturating_sub(written);
        let take = remaining.min(bytes.len() as u64) as usize;
        out.write_all(&bytes[..take]).map_err(BackupError::Sink)?;
        written += take as u64;
    }

    if written != row.size_in_bytes {
        return Err(BackupError::Catalog(CatalogError::UnknownBackup(backup_id)));
    }

    out.sync_all().map_err(BackupError::Sink)?;
    Ok(written)
}

/// Convenience for restoring "the latest completed backup of this device"
/// rather than a specific backup_id, used by the `restore` CLI subcommand
/// when `--backup-id` is omitted.
pub fn reconstruct_latest(
    catalog: &Catalog,
    device_path: &str,
    sink: &dyn Sink,
    out_path: &Path,
) -> Result<u64, BackupError> {
    let backup_id = catalog
        .latest_completed_backup(device_path)
        .map_err(BackupError::Catalog)?
        .ok_or_else(|| {
            BackupError::Catalog(CatalogError::NoCompletedBackup {
                device_path: device_path.to_owned(),
            })
        })?;
    reconstruct_into(catalog, backup_id, sink, out_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BackupType;
    use crate::hashing::hash_block;
    use crate::pipeline::{CancellationToken, PipelineItem};
    use crate::sink::DirectorySink;
    use crate::writer::run_backup_transaction;
    use crossbeam_channel::unbounded;
    use std::io::Read;

    fn item(position_index: u64, bytes: &[u8]) -> PipelineItem {
        PipelineItem {
            position_index,
            hash: hash_block(bytes),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn reconstructs_original_bytes_in_order() {
        let mut cat = Catalog::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::open(dir.path()).unwrap();
        let backup_id = cat.create_backup("/dev/sda", BackupType::Full, 4).unwrap();

        let (tx, rx) = unbounded();
        tx.send(item(0, b"aaaa")).unwrap();
        tx.send(item(1, b"bbbb")).unwrap();
        tx.send(item(2, b"cccc")).unwrap();
        drop(tx);
        let (_etx, erx) = unbounded();

        run_backup_transaction(&mut cat, backup_id, &mut sink, &rx, &erx, 4, &CancellationToken::new())
            .unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        let out_path = out_dir.path().join("restored.img");
        let written = reconstruct_into(&cat, backup_id, &sink, &out_path).unwrap();
        assert_eq!(written, 12);

        let mut buf = Vec::new();
        File::open(&out_path).unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"aaaabbbbcccc");
    }

    #[test]
    fn reconstruct_latest_finds_the_most_recent_completed_run() {
        let mut cat = Catalog::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::open(dir.path()).unwrap();
        let backup_id = cat.create_backup("/dev/sda", BackupType::Full, 4).unwrap();

        let (tx, rx) = unbounded();
        tx.send(item(0, b"abcd")).unwrap();
        drop(tx);
        let (_etx, erx) = unbounded();
        run_backup_transaction(&mut cat, backup_id, &mut sink, &rx, &erx, 4, &CancellationToken::new())
            .unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        let out_path = out_dir.path().join("restored.img");
        let written = reconstruct_latest(&cat, "/dev/sda", &sink, &out_path).unwrap();
        assert_eq!(written, 4);
    }
}
