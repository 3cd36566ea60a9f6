//! # blockvault — content-addressed block-level backup engine
//!
//! Reads a block device or image file in fixed-size blocks, deduplicates
//! content by SHA-256 across every backup of every device in one catalog,
//! and records per-backup position lists dense enough to reconstruct the
//! original bytes. The first backup of a device is `full`; every
//! subsequent one is `differential` — both are stored identically, the
//! label is purely for observability.
//!
//! Module map: [`volume`] reads blocks, [`hashing`] identifies them,
//! [`pipeline`] moves them from reader to writer, [`catalog`] is the
//! metadata store, [`planner`] picks full vs differential, [`writer`]
//! persists one backup transactionally, [`sink`] stores block payloads,
//! [`restore`] reverses it, [`orchestrator`] wires all of the above into
//! one backup run, and [`gc`] is an opt-in diagnostic sweep for orphaned
//! sink entries.

pub mod catalog;
pub mod config;
pub mod error;
pub mod gc;
pub mod hashing;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod restore;
pub mod sink;
pub mod volume;
pub mod writer;

pub use config::Config;
pub use error::BackupError;
pub use hashing::{hash_block, BlockHash};
