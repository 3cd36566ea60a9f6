//! Block pipeline — §4.5, §5.
//!
//! A bounded single-producer/single-consumer channel carrying hashed blocks
//! from the volume reader (producer) to the writer (consumer), plus a
//! distinct one-slot error channel so a device read failure on the producer
//! side doesn't have to be smuggled through the data channel (§7
//! "producer errors are forwarded through an error channel distinct from
//! the data buffer"). Producer and consumer are OS threads (`std::thread`),
//! not async tasks — the reference codebase has no async runtime and this
//! expansion introduces none.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};

use crate::error::BackupError;
use crate::hashing::{hash_block, BlockHash};
use crate::volume::VolumeReader;

/// One hashed block in position order, as handed from producer to consumer.
pub struct PipelineItem {
    pub position_index: u64,
    pub hash: BlockHash,
    pub bytes: Vec<u8>,
}

/// Shared cancellation flag, checked at both suspension boundaries (§5).
/// A cheap relaxed load guarding a blocking `send`/`recv` — neither side
/// spins.
#[derive(Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// How often a blocked producer re-checks the cancellation flag while
/// waiting for buffer space. The wait itself is still a blocking `send`,
/// not a spin loop — this only bounds how long cancellation can take to
/// take effect when the buffer is full.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Send `item`, waking periodically to check `cancel` while the buffer is
/// full. Returns `false` if cancelled or if the consumer has hung up.
fn send_or_cancel(
    item_tx: &Sender<PipelineItem>,
    mut item: PipelineItem,
    cancel: &CancellationToken,
) -> bool {
    loop {
        match item_tx.send_timeout(item, CANCEL_POLL_INTERVAL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                item = returned;
                if cancel.is_cancelled() {
                    return false;
                }
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// The producer's read-and-hash loop, run on its own thread. Sends hashed
/// blocks to `item_tx` in strict position order and never touches the
/// catalog (§5's "the producer never touches the catalog").
///
/// On a device I/O error the error is sent once on `error_tx` and the loop
/// stops; on cancellation the loop stops without an error. In both cases
/// `item_tx` is dropped when the function returns, which closes the channel
/// and lets the consumer's `for item in item_rx` loop terminate.
fn producer_loop(
    mut reader: VolumeReader,
    device_path: PathBuf,
    item_tx: Sender<PipelineItem>,
    error_tx: Sender<BackupError>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match reader.next_block() {
            Ok(Some((position_index, bytes))) => {
                let hash = hash_block(&bytes);
                let item = PipelineItem {
                    position_index,
                    hash,
                    bytes,
                };
                // A full buffer blocks here; send_or_cancel wakes periodically
                // so a cancellation arriving mid-send still takes effect
                // promptly instead of waiting for the consumer to drain.
                // `false` covers both cancellation and the consumer hanging up.
                if !send_or_cancel(&item_tx, item, &cancel) {
                    return;
                }
            }
            Ok(None) => return, // clean end-of-stream
            Err(source) => {
                let _ = error_tx.send(BackupError::Device {
                    path: device_path,
                    source,
                });
                return;
            }
        }
    }
}

/// A running pipeline: the item/error channel receivers the consumer reads
/// from, and a join handle for the producer thread.
pub struct Pipeline {
    pub items: Receiver<PipelineItem>,
    pub errors: Receiver<BackupError>,
    producer: JoinHandle<()>,
}

impl Pipeline {
    /// Start the producer thread reading `reader` through a channel of
    /// capacity `block_buffer_size` (§4.5's "bounded buffer of capacity
    /// `block_buffer_size`").
    pub fn spawn(
        reader: VolumeReader,
        device_path: PathBuf,
        block_buffer_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (item_tx, item_rx) = bounded(block_buffer_size);
        let (error_tx, error_rx) = bounded(1);

        let producer = thread::spawn(move || {
            producer_loop(reader, device_path, item_tx, error_tx, cancel);
        });

        Self {
            items: item_rx,
            errors: error_rx,
            producer,
        }
    }

    /// Wait for the producer thread to exit. Called by the consumer after
    /// draining `items` to completion (clean EOF, error, or cancellation).
    pub fn join(self) {
        let _ = self.producer.join();
    }

    /// Surface a producer-side error, if one arrived, without blocking.
    pub fn take_error(&self) -> Option<BackupError> {
        self.errors.try_recv().ok()
    }
}
