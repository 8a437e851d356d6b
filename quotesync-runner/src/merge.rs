//! Merge Writer: insert-missing-only persistence of a fetched batch.

use quotesync_core::domain::{Interval, OhlcvRow};
use quotesync_core::warehouse::validate_batch;
use quotesync_core::{OhlcvStore, StoreError};
use tracing::debug;

/// Rows offered to storage and rows that were actually new.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub offered: usize,
    pub inserted: usize,
}

impl MergeReport {
    /// Rows whose key was already stored.
    pub fn ignored(&self) -> usize {
        self.offered.saturating_sub(self.inserted)
    }
}

/// Writes batches through the single store session.
pub struct MergeWriter<'a> {
    store: &'a mut dyn OhlcvStore,
}

impl<'a> MergeWriter<'a> {
    pub fn new(store: &'a mut dyn OhlcvStore) -> Self {
        Self { store }
    }

    /// Atomically insert the rows of `rows` that are not stored yet.
    ///
    /// The batch is checked before storage is touched; a malformed batch writes nothing.
    pub fn merge(
        &mut self,
        symbol: &str,
        interval: Interval,
        rows: &[OhlcvRow],
    ) -> Result<MergeReport, StoreError> {
        validate_batch(symbol, interval, rows)?;
        let inserted = self.store.insert_missing(symbol, interval, rows)?;
        debug!(symbol, %interval, offered = rows.len(), inserted, "merged");
        Ok(MergeReport {
            offered: rows.len(),
            inserted,
        })
    }
}
