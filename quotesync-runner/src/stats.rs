//! Run statistics for sync and reprocess passes.

use crate::failure_queue::FailureKind;
use crate::sync::PairOutcome;
use quotesync_core::domain::Interval;
use std::time::Duration;

/// A pair that ended the run in the failure queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedPair {
    pub symbol: String,
    pub interval: Interval,
    pub kind: FailureKind,
    pub reason: String,
}

/// Totals for one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Pairs that reached a terminal state.
    pub pairs: usize,
    pub done: usize,
    pub skipped: usize,
    pub queued: usize,
    /// Done pairs whose fetch returned no rows.
    pub empty: usize,
    pub rows_fetched: usize,
    pub rows_inserted: usize,
    pub elapsed: Duration,
    pub queued_pairs: Vec<QueuedPair>,
}

impl SyncReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one pair's terminal state.
    pub fn tally(&mut self, symbol: &str, interval: Interval, outcome: &PairOutcome) {
        self.pairs += 1;
        match outcome {
            PairOutcome::Skipped => self.skipped += 1,
            PairOutcome::Done { fetched, inserted } => {
                self.done += 1;
                if *fetched == 0 {
                    self.empty += 1;
                }
                self.rows_fetched += fetched;
                self.rows_inserted += inserted;
            }
            PairOutcome::Queued(failure) => {
                self.queued += 1;
                self.queued_pairs.push(QueuedPair {
                    symbol: symbol.to_string(),
                    interval,
                    kind: failure.kind,
                    reason: failure.reason.clone(),
                });
            }
        }
    }

    /// Share of pairs that did not end up queued (%).
    pub fn success_rate(&self) -> f64 {
        if self.pairs == 0 {
            0.0
        } else {
            ((self.done + self.skipped) as f64 / self.pairs as f64) * 100.0
        }
    }

    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            pairs = self.pairs,
            done = self.done,
            skipped = self.skipped,
            queued = self.queued,
            empty = self.empty,
            rows_fetched = self.rows_fetched,
            rows_inserted = self.rows_inserted,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "run complete"
        );
    }
}

/// Totals for one reprocessing pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReprocessReport {
    /// Symbols read from the queue.
    pub symbols: usize,
    /// Symbols whose every pending interval succeeded and were cleared.
    pub recovered: usize,
    /// Symbols with some intervals resolved and others still failing.
    pub partially_recovered: usize,
    /// Symbols with no interval recovered.
    pub still_failing: usize,
    /// Pair-level totals of the replayed pipeline.
    pub pairs: SyncReport,
}

impl ReprocessReport {
    pub fn log_summary(&self) {
        tracing::info!(
            symbols = self.symbols,
            recovered = self.recovered,
            partially_recovered = self.partially_recovered,
            still_failing = self.still_failing,
            rows_inserted = self.pairs.rows_inserted,
            elapsed = format!("{:.1}s", self.pairs.elapsed.as_secs_f64()),
            "reprocessing complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{PairFailure, Stage};

    #[test]
    fn tally_counts_each_terminal_state() {
        let mut report = SyncReport::new();
        report.tally("A", Interval::Daily, &PairOutcome::Skipped);
        report.tally("B", Interval::Daily, &PairOutcome::Done { fetched: 5, inserted: 4 });
        report.tally("C", Interval::Daily, &PairOutcome::Done { fetched: 0, inserted: 0 });
        report.tally(
            "D",
            Interval::Weekly,
            &PairOutcome::Queued(PairFailure {
                stage: Stage::Fetch,
                kind: FailureKind::FetchError,
                reason: "timeout".into(),
            }),
        );

        assert_eq!(report.pairs, 4);
        assert_eq!((report.done, report.skipped, report.queued), (2, 1, 1));
        assert_eq!(report.empty, 1);
        assert_eq!(report.rows_fetched, 5);
        assert_eq!(report.rows_inserted, 4);
        assert_eq!(report.queued_pairs[0].symbol, "D");
        assert!((report.success_rate() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn empty_report_has_zero_success_rate() {
        assert_eq!(SyncReport::new().success_rate(), 0.0);
    }
}
