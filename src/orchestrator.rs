//! Orchestrator — §2 item 8 (ambient).
//!
//! Wires the volume reader, pipeline, writer, and catalog together for one
//! backup run, in the order §7 requires: validate config before any catalog
//! mutation, open the catalog, ask the planner, create the backup row, spawn
//! the pipeline, drain it in the writer, and map every failure onto
//! [`BackupError`] before returning to the CLI.

use log::{debug, error, info, warn};

use crate::catalog::{BackupType, Catalog};
use crate::config::{Config, OutputFormat};
use crate::error::BackupError;
use crate::pipeline::{CancellationToken, Pipeline};
use crate::planner;
use crate::sink::{DirectorySink, Sink, StreamSink};
use crate::volume::VolumeReader;
use crate::writer::{run_backup_transaction, BackupOutcome};

/// Run one backup of `config.device_path` to completion, or return the first
/// fatal [`BackupError`] encountered. `cancel` lets a caller (the CLI's
/// Ctrl-C handler, or a test) abort the run early; see §5's cancellation
/// semantics.
pub fn run_backup(config: &Config, cancel: CancellationToken) -> Result<(BackupType, BackupOutcome), BackupError> {
    config.validate()?;

    let mut catalog = Catalog::open(&config.catalog_path).map_err(BackupError::Catalog)?;
    let device_path = config.device_path.to_string_lossy().into_owned();

    let backup_type = planner::plan(&catalog, &device_path).map_err(BackupError::Catalog)?;
    info!(
        "starting {} backup of {} (block_size={}, buffer={})",
        backup_type, device_path, config.block_size, config.block_buffer_size
    );

    let backup_id = catalog
        .create_backup(&device_path, backup_type, config.block_size)
        .map_err(BackupError::Catalog)?;

    let result = run_backup_inner(config, &mut catalog, backup_id, &device_path, cancel);

    match &result {
        Ok((_, outcome)) => {
            info!(
                "completed backup {} of {}: {} blocks, {} novel, {} bytes",
                backup_id, device_path, outcome.total_blocks, outcome.novel_blocks, outcome.size_in_bytes
            );
        }
        Err(err) => {
            error!("backup {} of {} failed: {}", backup_id, device_path, err);
        }
    }
    result
}

fn run_backup_inner(
    config: &Config,
    catalog: &mut Catalog,
    backup_id: i64,
    device_path: &str,
    cancel: CancellationToken,
) -> Result<(BackupType, BackupOutcome), BackupError> {
    let reader = VolumeReader::open(&config.device_path, config.block_size).map_err(|source| {
        warn!("failed to open device {}: {}", device_path, source);
        BackupError::Device {
            path: config.device_path.clone(),
            source,
        }
    })?;
    // Captured before `reader` moves into the pipeline thread: this is the
    // true device byte count, not `total_blocks * block_size`, which would
    // include the zero-padding of a non-aligned trailing block (§3).
    let size_in_bytes = reader.size_bytes;

    let pipeline = Pipeline::spawn(
        reader,
        config.device_path.clone(),
        config.block_buffer_size,
        cancel.clone(),
    );

    let mut sink = open_sink(config)?;

    let outcome = run_backup_transaction(
        catalog,
        backup_id,
        sink.as_mut(),
        &pipeline.items,
        &pipeline.errors,
        size_in_bytes,
        &cancel,
    );
    pipeline.join();

    let outcome = outcome?;
    debug!(
        "backup {} persisted {} positions ({} novel blocks)",
        backup_id, outcome.total_blocks, outcome.novel_blocks
    );

    let backup_type = catalog.backup_row(backup_id).map_err(BackupError::Catalog)?.backup_type;
    Ok((backup_type, outcome))
}

fn open_sink(config: &Config) -> Result<Box<dyn Sink>, BackupError> {
    match config.output_format {
        OutputFormat::File => {
            let dir = config
                .output_directory
                .as_ref()
                .expect("validate() guarantees output_directory is set for OutputFormat::File");
            let sink = DirectorySink::open(dir).map_err(BackupError::Sink)?;
            Ok(Box::new(sink))
        }
        OutputFormat::Stream => {
            let path = config
                .output_stream_path
                .clone()
                .unwrap_or_else(|| config.catalog_path.with_extension("stream"));
            let sink = StreamSink::open(path).map_err(BackupError::Sink)?;
            Ok(Box::new(sink))
        }
    }
}
