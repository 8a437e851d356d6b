//! Synchronization Orchestrator: drives Coverage → Fetch → Merge for every pair.
//!
//! Each (symbol, interval) pair runs to a terminal state: `Skipped` when
//! coverage is current, `Done` once merged, `Queued` when any stage failed.
//! A failing pair is written to the failure queue and the run moves on; it is
//! never retried within the same pass.
//!
//! With `fetch_workers > 1`, coverage is checked for a window of pairs, the
//! window's provider calls run on a rayon pool, and merges run back on the
//! calling thread in catalog order. The store is only ever touched from the
//! calling thread.

use crate::config::SyncSettings;
use crate::coverage::{CoverageTracker, MissingRange};
use crate::failure_queue::{FailureKind, FailureQueue, QueueError};
use crate::fetcher::{FetchedRange, RangeFetcher};
use crate::merge::MergeWriter;
use crate::stats::SyncReport;
use chrono::NaiveDate;
use quotesync_core::data::{DataError, QuoteProvider};
use quotesync_core::domain::Interval;
use quotesync_core::OhlcvStore;
use rayon::prelude::*;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Pairs between progress log lines.
const PROGRESS_EVERY: usize = 100;

/// Run-level failures. Per-pair failures never surface here.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failure queue unavailable, aborting run: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to start fetch workers: {0}")]
    WorkerPool(String),
}

/// Pipeline stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Coverage,
    Fetch,
    Merge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub reason: String,
}

/// Terminal state of one (symbol, interval) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Skipped,
    Done { fetched: usize, inserted: usize },
    Queued(PairFailure),
}

impl PairOutcome {
    /// Skipped and Done both leave the pair current.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Queued(_))
    }
}

/// Result of the coverage check.
#[derive(Debug, Clone)]
enum Plan {
    Skip,
    Fetch {
        start: NaiveDate,
        end: NaiveDate,
        initial: bool,
    },
    Fail(PairFailure),
}

/// Plan plus provider result, ready for the merge stage.
#[derive(Debug)]
enum Step {
    Skip,
    Fail(PairFailure),
    Fetched {
        start: NaiveDate,
        end: NaiveDate,
        initial: bool,
        result: Result<FetchedRange, DataError>,
    },
}

impl Plan {
    fn execute(
        self,
        fetcher: &RangeFetcher<'_>,
        symbol: &str,
        interval: Interval,
        today: NaiveDate,
        lookback: chrono::Duration,
    ) -> Step {
        match self {
            Plan::Skip => Step::Skip,
            Plan::Fail(failure) => Step::Fail(failure),
            Plan::Fetch {
                start,
                end,
                initial,
            } => Step::Fetched {
                start,
                end,
                initial,
                result: fetcher.fetch(symbol, interval, start, end, today, lookback),
            },
        }
    }
}

/// Drives the pipeline over a set of pairs against one store and one queue.
pub struct Synchronizer<'a> {
    provider: &'a dyn QuoteProvider,
    store: &'a mut dyn OhlcvStore,
    queue: &'a mut dyn FailureQueue,
    settings: SyncSettings,
    tracker: CoverageTracker,
    request_delay: Duration,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        provider: &'a dyn QuoteProvider,
        store: &'a mut dyn OhlcvStore,
        queue: &'a mut dyn FailureQueue,
        settings: SyncSettings,
    ) -> Self {
        let tracker = CoverageTracker::new(settings.freshness_slack_days);
        Self {
            provider,
            store,
            queue,
            settings,
            tracker,
            request_delay: Duration::ZERO,
        }
    }

    /// Pause after every provider call.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn queue(&self) -> &dyn FailureQueue {
        &*self.queue
    }

    pub fn queue_mut(&mut self) -> &mut dyn FailureQueue {
        &mut *self.queue
    }

    fn fetcher(&self) -> RangeFetcher<'a> {
        RangeFetcher::new(self.provider, self.request_delay)
    }

    /// Synchronize every configured interval for `symbols`, daily pass first.
    pub fn run(&mut self, symbols: &[String], today: NaiveDate) -> Result<SyncReport, SyncError> {
        let pairs: Vec<(&str, Interval)> = self
            .settings
            .ordered_intervals()
            .into_iter()
            .flat_map(|interval| symbols.iter().map(move |s| (s.as_str(), interval)))
            .collect();
        info!(
            provider = self.provider.name(),
            symbols = symbols.len(),
            pairs = pairs.len(),
            %today,
            workers = self.settings.fetch_workers,
            "starting sync"
        );
        self.run_pairs(&pairs, today)
    }

    /// Run an explicit list of pairs in order.
    pub fn run_pairs(
        &mut self,
        pairs: &[(&str, Interval)],
        today: NaiveDate,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let mut report = SyncReport::new();

        if self.settings.fetch_workers <= 1 {
            for (symbol, interval) in pairs {
                let outcome = self.process_pair(symbol, *interval, today)?;
                report.tally(symbol, *interval, &outcome);
                log_progress(&report, pairs.len());
            }
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.settings.fetch_workers)
                .thread_name(|i| format!("quotesync-fetch-{i}"))
                .build()
                .map_err(|e| SyncError::WorkerPool(e.to_string()))?;

            // Enough pairs per window to keep every worker busy.
            let window = self.settings.fetch_workers * 4;
            for chunk in pairs.chunks(window) {
                self.run_window(&pool, chunk, today, pairs.len(), &mut report)?;
            }
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    fn run_window(
        &mut self,
        pool: &rayon::ThreadPool,
        chunk: &[(&str, Interval)],
        today: NaiveDate,
        total: usize,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let planned: Vec<(&str, Interval, Plan)> = chunk
            .iter()
            .map(|(symbol, interval)| (*symbol, *interval, self.plan(symbol, *interval, today)))
            .collect();

        let fetcher = self.fetcher();
        let settings = &self.settings;
        let steps: Vec<(&str, Interval, Step)> = pool.install(|| {
            planned
                .into_par_iter()
                .map(|(symbol, interval, plan)| {
                    let lookback = settings.lookback(interval);
                    let step = plan.execute(&fetcher, symbol, interval, today, lookback);
                    (symbol, interval, step)
                })
                .collect()
        });

        for (symbol, interval, step) in steps {
            let outcome = self.complete(symbol, interval, step)?;
            report.tally(symbol, interval, &outcome);
            log_progress(report, total);
        }
        Ok(())
    }

    /// Take one pair through the whole pipeline.
    ///
    /// Failures are recorded in the queue and returned as `Queued`; only a
    /// failure to write the queue itself is an error.
    pub fn process_pair(
        &mut self,
        symbol: &str,
        interval: Interval,
        today: NaiveDate,
    ) -> Result<PairOutcome, SyncError> {
        let plan = self.plan(symbol, interval, today);
        let lookback = self.settings.lookback(interval);
        let step = plan.execute(&self.fetcher(), symbol, interval, today, lookback);
        self.complete(symbol, interval, step)
    }

    fn plan(&self, symbol: &str, interval: Interval, today: NaiveDate) -> Plan {
        let lookback = self.settings.lookback(interval);
        match self
            .tracker
            .missing_range(&*self.store, symbol, interval, today, lookback)
        {
            Ok(MissingRange::UpToDate) => Plan::Skip,
            Ok(range) => match range.bounds() {
                Some((start, end)) => Plan::Fetch {
                    start,
                    end,
                    initial: range.is_initial(),
                },
                None => Plan::Skip,
            },
            Err(e) => Plan::Fail(PairFailure {
                stage: Stage::Coverage,
                kind: FailureKind::StorageError,
                reason: format!("coverage lookup failed: {e}"),
            }),
        }
    }

    fn complete(
        &mut self,
        symbol: &str,
        interval: Interval,
        step: Step,
    ) -> Result<PairOutcome, SyncError> {
        let outcome = match step {
            Step::Skip => PairOutcome::Skipped,
            Step::Fail(failure) => PairOutcome::Queued(failure),
            Step::Fetched {
                result: Err(e), ..
            } => PairOutcome::Queued(PairFailure {
                stage: Stage::Fetch,
                kind: FailureKind::FetchError,
                reason: e.to_string(),
            }),
            Step::Fetched {
                start,
                end,
                initial,
                result: Ok(fetched),
            } => {
                if fetched.is_empty() {
                    if initial && self.settings.empty_initial_is_failure {
                        PairOutcome::Queued(PairFailure {
                            stage: Stage::Fetch,
                            kind: FailureKind::EmptyInitial,
                            reason: format!("no data returned for {start}..{end}"),
                        })
                    } else {
                        PairOutcome::Done {
                            fetched: 0,
                            inserted: 0,
                        }
                    }
                } else {
                    match MergeWriter::new(&mut *self.store).merge(symbol, interval, &fetched.rows) {
                        Ok(merged) => PairOutcome::Done {
                            fetched: merged.offered,
                            inserted: merged.inserted,
                        },
                        Err(e) => PairOutcome::Queued(PairFailure {
                            stage: Stage::Merge,
                            kind: FailureKind::StorageError,
                            reason: format!("merge failed: {e}"),
                        }),
                    }
                }
            }
        };

        match &outcome {
            PairOutcome::Skipped => debug!(symbol, %interval, "up to date"),
            PairOutcome::Done { fetched, inserted } => {
                info!(symbol, %interval, rows = fetched, inserted, "synchronized")
            }
            PairOutcome::Queued(failure) => {
                warn!(
                    symbol,
                    %interval,
                    stage = ?failure.stage,
                    kind = %failure.kind,
                    error = %failure.reason,
                    "pair failed, queued for reprocessing"
                );
                self.queue
                    .record(symbol, interval, failure.kind, &failure.reason)?;
            }
        }
        Ok(outcome)
    }
}

fn log_progress(report: &SyncReport, total: usize) {
    if report.pairs % PROGRESS_EVERY == 0 {
        info!(processed = report.pairs, total, queued = report.queued, "progress");
    }
}
