//! Reprocessor: replays the sync pipeline for queued symbols only.
//!
//! Every pending symbol gets exactly one attempt per run, restricted to the
//! intervals that are still failing. A symbol whose intervals all succeed is
//! cleared; one that only partly recovers has the recovered intervals resolved
//! while the synchronizer re-records the rest.

use crate::failure_queue::PendingSymbol;
use crate::stats::ReprocessReport;
use crate::sync::{PairOutcome, SyncError, Synchronizer};
use chrono::NaiveDate;
use quotesync_core::domain::Interval;
use std::time::Instant;
use tracing::{info, warn};

pub struct Reprocessor<'a> {
    sync: Synchronizer<'a>,
}

impl<'a> Reprocessor<'a> {
    pub fn new(sync: Synchronizer<'a>) -> Self {
        Self { sync }
    }

    /// Drain the failure queue once.
    pub fn run(&mut self, today: NaiveDate) -> Result<ReprocessReport, SyncError> {
        let started = Instant::now();
        let pending = self.sync.queue().list_pending()?;
        info!(symbols = pending.len(), "reprocessing queued symbols");

        let mut report = ReprocessReport {
            symbols: pending.len(),
            ..ReprocessReport::default()
        };

        for entry in &pending {
            self.retry_symbol(entry, today, &mut report)?;
        }

        report.pairs.elapsed = started.elapsed();
        Ok(report)
    }

    fn retry_symbol(
        &mut self,
        entry: &PendingSymbol,
        today: NaiveDate,
        report: &mut ReprocessReport,
    ) -> Result<(), SyncError> {
        let symbol = entry.symbol.as_str();
        let mut recovered: Vec<Interval> = Vec::new();

        for &interval in &entry.intervals {
            let outcome = self.sync.process_pair(symbol, interval, today)?;
            report.pairs.tally(symbol, interval, &outcome);
            if outcome.is_success() {
                recovered.push(interval);
            } else if let PairOutcome::Queued(failure) = &outcome {
                warn!(symbol, %interval, error = %failure.reason, "still failing");
            }
        }

        if recovered.len() == entry.intervals.len() {
            self.sync.queue_mut().clear(symbol)?;
            report.recovered += 1;
            info!(symbol, attempts = entry.attempts, "recovered");
        } else if recovered.is_empty() {
            report.still_failing += 1;
        } else {
            for interval in &recovered {
                self.sync.queue_mut().resolve(symbol, *interval)?;
            }
            report.partially_recovered += 1;
            info!(
                symbol,
                recovered = recovered.len(),
                pending = entry.intervals.len() - recovered.len(),
                "partially recovered"
            );
        }
        Ok(())
    }
}
