//! Backup planner — §4.4.
//!
//! Pure dispatch: if the catalog has any prior *completed* backup of this
//! device, the new run is `differential`; otherwise `full`. The decision is
//! made once, at run start (§9's "Planner decision at run start vs at first
//! novel block"), so the label is deterministic and observable before any
//! block is processed — the storage semantics (dedup against all known
//! blocks) are identical either way.

use crate::catalog::{BackupType, Catalog};
use crate::error::CatalogError;

pub fn plan(catalog: &Catalog, device_path: &str) -> Result<BackupType, CatalogError> {
    match catalog.latest_completed_backup(device_path)? {
        Some(_) => Ok(BackupType::Differential),
        None => Ok(BackupType::Full),
    }
}
