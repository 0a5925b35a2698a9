use std::path::PathBuf;

use eyre::{Context, Result};

use crate::config::MAX_BATCH_SIZE;
use crate::logger::Logger;
use crate::stats::RunStats;
use crate::util::{
    write_list_file, DeviceId, RemoteAccount, RemoteStore, TransferItem, TransferType,
};

/// Where a batch goes.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub device: DeviceId,
    pub account: RemoteAccount,
}

/// Groups discovered files into batches and submits them to the store.
pub struct BatchUploader<'a> {
    store: &'a dyn RemoteStore,
    target: &'a UploadTarget,
    batch_size: usize,
    pending: Vec<PathBuf>,
}

impl<'a> BatchUploader<'a> {
    pub fn new(store: &'a dyn RemoteStore, target: &'a UploadTarget, batch_size: usize) -> Self {
        let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        Self {
            store,
            target,
            batch_size,
            pending: Vec::with_capacity(batch_size),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue `path`, uploading the queue once it reaches the batch size.
    pub fn push(
        &mut self,
        path: PathBuf,
        stats: &mut RunStats,
        logger: &dyn Logger,
    ) -> Result<()> {
        self.pending.push(path);
        if self.pending.len() >= self.batch_size {
            self.flush(stats, logger)?;
        }
        Ok(())
    }

    /// Upload whatever is still queued. Does nothing for an empty queue.
    pub fn finish(mut self, stats: &mut RunStats, logger: &dyn Logger) -> Result<()> {
        self.flush(stats, logger)
    }

    fn flush(&mut self, stats: &mut RunStats, logger: &dyn Logger) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let list_file = write_list_file(&self.pending)?;
        let count = self.pending.len();
        self.pending.clear();

        log::info!("Uploading batch of {count} files...");

        let items = self
            .store
            .upload_batch(&self.target.device, &self.target.account, list_file.path())
            .wrap_err("failed to upload files")?;

        reconcile(&items, stats, logger);
        Ok(())
    }
}

/// Per-batch outcome counts, used to check conservation per batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchTally {
    pub complete: usize,
    pub bytes: u64,
}

/// Fold one batch response into `stats`.
///
/// Only records at 100% count. The utility reports a running total for the
/// batch, so a file's own size is the difference to the previous complete
/// record (zero for the first one).
pub fn reconcile(
    items: &[TransferItem],
    stats: &mut RunStats,
    logger: &dyn Logger,
) -> BatchTally {
    let mut tally = BatchTally::default();
    let mut last_total_size = 0u64;

    for item in items.iter().filter(|item| item.is_complete()) {
        let transfer_size = match item.total_size.checked_sub(last_total_size) {
            Some(size) => size,
            None => {
                logger.note(&format!(
                    "Transfer total went backwards from {last_total_size} to {} at /{}",
                    item.total_size, item.file_name
                ));
                0
            }
        };
        last_total_size = item.total_size;
        tally.complete += 1;

        match &item.transfer_type {
            TransferType::Full | TransferType::Incremental => {
                let (size, unit) = format_size(transfer_size);
                logger.transferred(&item.file_name, size, unit, &item.rate);
                tally.bytes += transfer_size;
                stats.add_backed_up();
            }
            TransferType::InSync => stats.add_already_present(),
            TransferType::Other(_) => {
                logger.failed(&item.raw);
                stats.add_failed();
            }
        }
    }

    tally
}

/// Scale a byte count by powers of 1024 while it exceeds 1024.
pub fn format_size(size: u64) -> (f64, &'static str) {
    const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];

    let mut value = size as f64;
    let mut unit = 0usize;
    while value > 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    (value, UNITS[unit])
}
