//! Writer/persister — §4.6.
//!
//! Drains the pipeline's consumer side inside a single `rusqlite` transaction
//! per backup run: for each item, upsert the block, write novel bytes to the
//! sink, then insert the position row. `FinalizeBackup` only runs once the
//! iterator is exhausted, cancellation was never observed, and the producer
//! never reported a device error on its separate error channel — the item
//! channel closing is ambiguous between clean end-of-stream and an aborted
//! producer, so the error channel is checked before committing (§4.5, §7:
//! "producer errors are forwarded through an error channel distinct from the
//! data buffer"). In any of those cases the transaction is left to drop,
//! which rolls it back (§7's "no intermediate visible state").

use crossbeam_channel::Receiver;

use crate::catalog::{finalize_backup, insert_position, upsert_block, Catalog};
use crate::error::BackupError;
use crate::pipeline::{CancellationToken, PipelineItem};
use crate::sink::Sink;

/// Counts reported back to the orchestrator once a run completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupOutcome {
    pub total_blocks: u64,
    pub novel_blocks: u64,
    pub size_in_bytes: u64,
}

/// Run the consumer side of one backup: drain `items`, persist each one, and
/// finalize. Returns `Err(BackupError::Cancelled)` if `cancel` was observed
/// before the stream was exhausted, leaving the transaction unfinalized and
/// rolled back on drop.
pub fn run_backup_transaction(
    catalog: &mut Catalog,
    backup_id: i64,
    sink: &mut dyn Sink,
    items: &Receiver<PipelineItem>,
    errors: &Receiver<BackupError>,
    size_in_bytes: u64,
    cancel: &CancellationToken,
) -> Result<BackupOutcome, BackupError> {
    let tx = catalog.begin_backup_transaction().map_err(BackupError::Catalog)?;

    let mut total_blocks: u64 = 0;
    let mut novel_blocks: u64 = 0;

    for item in items.iter() {
        if cancel.is_cancelled() {
            // tx drops here unfinalized — rolled back, no partial state.
            return Err(BackupError::Cancelled);
        }
        if let Ok(producer_err) = errors.try_recv() {
            return Err(producer_err);
        }

        let (block_id, was_new) =
            upsert_block(&tx, &item.hash, item.bytes.len() as u64).map_err(BackupError::Catalog)?;
        if was_new {
            sink.write_block(&item.hash, &item.bytes).map_err(BackupError::Sink)?;
            novel_blocks += 1;
        }
        insert_position(&tx, backup_id, item.position_index, block_id).map_err(BackupError::Catalog)?;

        total_blocks += 1;
    }

    if cancel.is_cancelled() {
        return Err(BackupError::Cancelled);
    }
    // The producer closes `item_tx` whether it hit EOF or an error; a final
    // check here catches an error sent just before that close raced the last
    // item's delivery.
    if let Ok(producer_err) = errors.try_recv() {
        return Err(producer_err);
    }

    // `size_in_bytes` is the true device byte count, captured by the caller
    // from `VolumeReader.size_bytes` before the reader was handed to the
    // pipeline thread — not derived from `total_blocks * block_size`, which
    // would include the zero-padding of a non-aligned trailing block (§3's
    // `total_blocks * block_size >= size_in_bytes > (total_blocks - 1) *
    // block_size` invariant). `restore::reconstruct_into` truncates to this
    // value, so the padding must never leak in here.
    finalize_backup(&tx, backup_id, total_blocks, size_in_bytes).map_err(BackupError::Catalog)?;
    tx.commit().map_err(|e| BackupError::Catalog(e.into()))?;

    Ok(BackupOutcome {
        total_blocks,
        novel_blocks,
        size_in_bytes,
    })
}
