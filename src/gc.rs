//! Orphan sweep — §9 (opt-in, diagnostic-only companion to the sink's
//! "orphans are acceptable" contract). Grounded in the reference codebase's
//! `recovery` module: a read-only scan that reports, never repairs.
//!
//! An orphan is a sink entry whose hash the catalog no longer references —
//! left behind by an aborted run's partially-written novel blocks (§4.6).
//! This never runs implicitly; nothing in the orchestrator calls it.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use crate::catalog::Catalog;
use crate::error::BackupError;
use crate::hashing::BlockHash;

/// One sink entry with no referencing position row in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanEntry {
    pub hash: BlockHash,
    pub path: std::path::PathBuf,
}

/// Compare a directory sink's file listing against every hash the catalog
/// still references, and report entries with no referent. Only meaningful
/// for the directory sink, whose files are individually named by hash; the
/// stream sink has no per-entry files to list.
pub fn sweep_orphans(catalog: &Catalog, sink_dir: &Path) -> Result<Vec<OrphanEntry>, BackupError> {
    let referenced: HashSet<BlockHash> = catalog
        .all_referenced_hashes()
        .map_err(BackupError::Catalog)?
        .into_iter()
        .collect();

    let mut orphans = Vec::new();
    for entry in read_dir_entries(sink_dir).map_err(BackupError::Sink)? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".tmp") {
            continue;
        }
        if let Some(hash) = parse_hex_hash(&name) {
            if !referenced.contains(&hash) {
                orphans.push(OrphanEntry {
                    hash,
                    path: entry.path(),
                });
            }
        }
    }
    Ok(orphans)
}

fn read_dir_entries(dir: &Path) -> io::Result<Vec<fs::DirEntry>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        out.push(entry?);
    }
    Ok(out)
}

fn parse_hex_hash(name: &str) -> Option<BlockHash> {
    if name.len() != 64 {
        return None;
    }
    let bytes = hex::decode(name).ok()?;
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Some(BlockHash(arr))
}
