//! Crate-wide error taxonomy.
//!
//! Every fatal condition in the engine resolves to one [`BackupError`]
//! variant, matching the five error kinds of the backup engine design:
//! configuration, device I/O, catalog, sink, and integrity violations.
//! Nothing here is retried except the bounded device-read retry in
//! [`crate::volume`] — by the time an error reaches this type it is final.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("device_path must not be empty")]
    EmptyDevicePath,
    #[error("block_size must be a positive power of two, got {0}")]
    InvalidBlockSize(u64),
    #[error("block_buffer_size must be at least 1")]
    InvalidBufferSize,
    #[error("output_format = file requires --output-dir")]
    MissingOutputDirectory,
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A backup for this device is already in progress (no completed_at yet).
    /// Raised by `CreateBackup`'s advisory-lock predicate.
    #[error("a backup for device {device_path} is already in progress")]
    ConcurrentBackup { device_path: String },
    #[error("no such backup id {0}")]
    UnknownBackup(i64),
    #[error("device {device_path} has no completed backup to restore from")]
    NoCompletedBackup { device_path: String },
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("device I/O error reading {path}: {source}")]
    Device { path: PathBuf, source: io::Error },
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("sink error: {0}")]
    Sink(#[from] io::Error),
    /// A unique-constraint conflict where none was expected — a bug signal,
    /// not a retryable condition. See §4.6's tie-break note and §7.5.
    #[error("integrity violation: {0}")]
    Integrity(String),
    /// The run was cancelled before the final position was written. Not
    /// itself a failure the caller needs to retry — the backup is simply
    /// absent from the catalog.
    #[error("backup run was cancelled")]
    Cancelled,
}

impl BackupError {
    /// Process exit code for the CLI, one arm per error kind (§6).
    pub fn exit_code(&self) -> i32 {
        match self {
            BackupError::Config(_) => 2,
            BackupError::Device { .. } => 3,
            BackupError::Catalog(_) => 4,
            BackupError::Sink(_) => 5,
            BackupError::Integrity(_) => 6,
            BackupError::Cancelled => 7,
        }
    }
}
