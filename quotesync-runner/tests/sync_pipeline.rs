//! End-to-end tests of the sync and reprocess passes.
//!
//! A scripted in-process provider stands in for the network: it serves a bar
//! for every weekday (daily) or Monday (weekly) of the requested range, logs
//! every call, and can be told to fail or return nothing for given pairs.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use proptest::prelude::*;
use quotesync_core::data::{DataError, FetchResult, QuoteProvider, RawBar};
use quotesync_core::domain::{Interval, OhlcvRow};
use quotesync_core::{OhlcvStore, StoreError, Warehouse};
use quotesync_runner::{
    FailureKind, FailureLog, FailureQueue, FailureRecord, PairOutcome, PendingSymbol, QueueError,
    Reprocessor, Stage, SyncError, SyncSettings, Synchronizer,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

const CAP: i64 = 1825;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// Wednesday.
fn today() -> NaiveDate {
    d(2024, 6, 12)
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ── Scripted provider ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct Call {
    symbol: String,
    interval: Interval,
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Default)]
struct ScriptedProvider {
    calls: Mutex<Vec<Call>>,
    /// Remaining failures per pair; `u32::MAX` fails forever.
    failures: Mutex<HashMap<(String, Interval), u32>>,
    empty: HashSet<String>,
}

impl ScriptedProvider {
    fn fail(&self, symbol: &str, interval: Interval, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert((symbol.to_string(), interval), times);
    }

    fn heal(&self) {
        self.failures.lock().unwrap().clear();
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

fn price(date: NaiveDate) -> f64 {
    100.0 + (date.num_days_from_ce() % 50) as f64
}

fn bar_dates(interval: Interval, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .filter(|day| match interval {
            Interval::Daily => !matches!(day.weekday(), Weekday::Sat | Weekday::Sun),
            Interval::Weekly => day.weekday() == Weekday::Mon,
        })
        .collect()
}

impl QuoteProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        self.calls.lock().unwrap().push(Call {
            symbol: symbol.to_string(),
            interval,
            start,
            end,
        });

        if let Some(remaining) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&(symbol.to_string(), interval))
        {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(DataError::NetworkUnreachable("connection reset".into()));
            }
        }

        let bars = if self.empty.contains(symbol) {
            Vec::new()
        } else {
            bar_dates(interval, start, end)
                .into_iter()
                .map(|date| RawBar {
                    date,
                    open: Some(price(date)),
                    high: Some(price(date) + 2.0),
                    low: Some(price(date) - 2.0),
                    close: Some(price(date) + 1.0),
                    volume: Some(10_000),
                })
                .collect()
        };

        Ok(FetchResult {
            symbol: symbol.to_string(),
            interval,
            bars,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}

// ── Store and queue doubles ──────────────────────────────────────────

/// Warehouse whose writes (or reads) fail for selected symbols.
struct FlakyStore {
    inner: Warehouse,
    broken_writes: HashSet<String>,
    broken_reads: HashSet<String>,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: Warehouse::open_in_memory().unwrap(),
            broken_writes: HashSet::new(),
            broken_reads: HashSet::new(),
        }
    }
}

fn disk_error() -> StoreError {
    StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk I/O error"))
}

impl OhlcvStore for FlakyStore {
    fn last_date(&self, symbol: &str, interval: Interval) -> Result<Option<NaiveDate>, StoreError> {
        if self.broken_reads.contains(symbol) {
            return Err(disk_error());
        }
        self.inner.last_date(symbol, interval)
    }

    fn insert_missing(
        &mut self,
        symbol: &str,
        interval: Interval,
        rows: &[OhlcvRow],
    ) -> Result<usize, StoreError> {
        if self.broken_writes.contains(symbol) {
            return Err(disk_error());
        }
        self.inner.insert_missing(symbol, interval, rows)
    }
}

/// Queue that cannot be written.
struct BrokenQueue;

impl FailureQueue for BrokenQueue {
    fn record(&mut self, _: &str, _: Interval, _: FailureKind, _: &str) -> Result<(), QueueError> {
        Err(QueueError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only filesystem",
        )))
    }

    fn list_pending(&self) -> Result<Vec<PendingSymbol>, QueueError> {
        Ok(Vec::new())
    }

    fn clear(&mut self, _: &str) -> Result<(), QueueError> {
        Ok(())
    }

    fn resolve(&mut self, _: &str, _: Interval) -> Result<(), QueueError> {
        Ok(())
    }

    fn records(&self) -> Result<Vec<FailureRecord>, QueueError> {
        Ok(Vec::new())
    }
}

fn failure_log(dir: &tempfile::TempDir) -> FailureLog {
    FailureLog::new(dir.path().join("failed_symbols.txt"))
}

fn assert_unique_and_sorted(rows: &[OhlcvRow]) {
    for pair in rows.windows(2) {
        assert!(pair[0].date < pair[1].date, "duplicate or unsorted at {}", pair[1].date);
    }
}

// ── Properties ───────────────────────────────────────────────────────

#[test]
fn initial_sync_fetches_capped_window_for_both_intervals() {
    let provider = ScriptedProvider::default();
    let mut store = Warehouse::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut queue = failure_log(&dir);

    let report = {
        let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        sync.run(&symbols(&["INFY", "TCS"]), today()).unwrap()
    };

    assert_eq!(report.pairs, 4);
    assert_eq!(report.done, 4);
    assert_eq!(report.queued, 0);
    assert_eq!(report.rows_fetched, report.rows_inserted);

    let calls = provider.calls();
    assert_eq!(calls.len(), 4);
    // Daily pass for all symbols precedes the weekly pass.
    let intervals: Vec<_> = calls.iter().map(|c| c.interval).collect();
    assert_eq!(
        intervals,
        vec![Interval::Daily, Interval::Daily, Interval::Weekly, Interval::Weekly]
    );
    for call in &calls {
        assert_eq!(call.end, today());
        assert!(call.start >= today() - Duration::days(CAP), "provider cap exceeded");
    }

    let daily = store.load_rows("INFY", Interval::Daily).unwrap();
    assert_eq!(daily.len(), bar_dates(Interval::Daily, today() - Duration::days(CAP), today()).len());
    assert_unique_and_sorted(&daily);
    assert_eq!(daily.last().unwrap().date, today());
}

#[test]
fn second_same_day_run_writes_nothing() {
    let provider = ScriptedProvider::default();
    let mut store = Warehouse::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut queue = failure_log(&dir);
    let universe = symbols(&["INFY", "TCS"]);

    {
        let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        sync.run(&universe, today()).unwrap();
    }
    let rows_before = store.row_count(Interval::Daily).unwrap() + store.row_count(Interval::Weekly).unwrap();
    provider.reset_calls();

    let report = {
        let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        sync.run(&universe, today()).unwrap()
    };

    assert_eq!(report.skipped, 4);
    assert_eq!(report.rows_inserted, 0);
    assert!(provider.calls().is_empty(), "up-to-date pairs must not hit the provider");
    let rows_after = store.row_count(Interval::Daily).unwrap() + store.row_count(Interval::Weekly).unwrap();
    assert_eq!(rows_before, rows_after);
}

#[test]
fn tail_gap_is_filled_without_holes() {
    let provider = ScriptedProvider::default();
    let mut store = Warehouse::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut queue = failure_log(&dir);
    let universe = symbols(&["INFY"]);
    let earlier = d(2024, 5, 31);

    {
        let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        sync.run(&universe, earlier).unwrap();
    }
    let before = store.load_rows("INFY", Interval::Daily).unwrap();
    provider.reset_calls();

    {
        let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        sync.run(&universe, today()).unwrap();
    }

    let daily_call = provider
        .calls()
        .into_iter()
        .find(|c| c.interval == Interval::Daily)
        .unwrap();
    assert_eq!(daily_call.start, earlier + Duration::days(1));
    assert_eq!(daily_call.end, today());

    let rows = store.load_rows("INFY", Interval::Daily).unwrap();
    assert_unique_and_sorted(&rows);
    let expected = bar_dates(Interval::Daily, rows[0].date, today());
    let stored: Vec<_> = rows.iter().map(|r| r.date).collect();
    assert_eq!(stored, expected, "every weekday between first and last must be stored");

    // History up to the earlier run is untouched.
    assert_eq!(&rows[..before.len()], before.as_slice());
    assert_eq!(before.last().unwrap().date, earlier);

    // Gap rows carry exactly what the provider served.
    let filled = &rows[before.len()..];
    assert_eq!(filled.len(), bar_dates(Interval::Daily, earlier + Duration::days(1), today()).len());
    for row in filled {
        assert!(row.date > earlier);
        assert_eq!(row.open, price(row.date));
        assert_eq!(row.high, price(row.date) + 2.0);
        assert_eq!(row.low, price(row.date) - 2.0);
        assert_eq!(row.close, price(row.date) + 1.0);
        assert_eq!(row.volume, 10_000);
    }
}

#[test]
fn one_failing_symbol_does_not_affect_the_others() {
    let provider = ScriptedProvider::default();
    provider.fail("TCS", Interval::Daily, u32::MAX);
    let mut store = Warehouse::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut queue = failure_log(&dir);

    let report = {
        let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        sync.run(&symbols(&["ABB", "TCS", "WIPRO"]), today()).unwrap()
    };

    assert_eq!(report.done, 5);
    assert_eq!(report.queued, 1);
    assert_eq!(report.queued_pairs[0].symbol, "TCS");
    assert_eq!(report.queued_pairs[0].kind, FailureKind::FetchError);

    for ok in ["ABB", "WIPRO"] {
        assert!(store.last_date(ok, Interval::Daily).unwrap().is_some());
    }
    assert_eq!(store.last_date("TCS", Interval::Daily).unwrap(), None);
    assert!(store.last_date("TCS", Interval::Weekly).unwrap().is_some());

    let pending = queue.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].symbol, "TCS");
    assert_eq!(pending[0].intervals, vec![Interval::Daily]);
    assert!(pending[0].last_reason.contains("connection reset"));
}

#[test]
fn reprocessing_drains_recovered_symbols() {
    let provider = ScriptedProvider::default();
    provider.fail("TCS", Interval::Daily, u32::MAX);
    provider.fail("TCS", Interval::Weekly, u32::MAX);
    let mut store = Warehouse::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut queue = failure_log(&dir);

    {
        let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        sync.run(&symbols(&["INFY", "TCS"]), today()).unwrap();
    }
    assert_eq!(queue.list_pending().unwrap().len(), 1);

    provider.heal();
    provider.reset_calls();
    let report = {
        let sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        Reprocessor::new(sync).run(today()).unwrap()
    };

    assert_eq!(report.symbols, 1);
    assert_eq!(report.recovered, 1);
    assert_eq!(report.still_failing, 0);
    // Only the queued symbol is touched.
    assert!(provider.calls().iter().all(|c| c.symbol == "TCS"));
    assert_eq!(provider.calls().len(), 2);

    assert!(queue.list_pending().unwrap().is_empty());
    assert!(store.last_date("TCS", Interval::Daily).unwrap().is_some());
    assert!(store.last_date("TCS", Interval::Weekly).unwrap().is_some());
}

#[test]
fn reprocessing_keeps_still_failing_symbols_pending() {
    let provider = ScriptedProvider::default();
    provider.fail("TCS", Interval::Daily, u32::MAX);
    let mut store = Warehouse::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut queue = failure_log(&dir);

    {
        let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        sync.run(&symbols(&["TCS"]), today()).unwrap();
    }

    let report = {
        let sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        Reprocessor::new(sync).run(today()).unwrap()
    };
    assert_eq!(report.still_failing, 1);

    let pending = queue.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 2, "a fresh failure record is appended");
}

#[test]
fn partial_recovery_resolves_only_recovered_intervals() {
    let provider = ScriptedProvider::default();
    provider.fail("TCS", Interval::Daily, u32::MAX);
    provider.fail("TCS", Interval::Weekly, u32::MAX);
    let mut store = Warehouse::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut queue = failure_log(&dir);

    {
        let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        sync.run(&symbols(&["TCS"]), today()).unwrap();
    }

    provider.heal();
    provider.fail("TCS", Interval::Weekly, u32::MAX);
    let report = {
        let sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        Reprocessor::new(sync).run(today()).unwrap()
    };
    assert_eq!(report.partially_recovered, 1);

    let pending = queue.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].intervals, vec![Interval::Weekly]);
}

#[test]
fn up_to_date_pair_is_skipped_without_provider_call() {
    let provider = ScriptedProvider::default();
    let mut store = Warehouse::open_in_memory().unwrap();
    let row = OhlcvRow {
        symbol: "INFY".into(),
        interval: Interval::Daily,
        date: today(),
        open: 1.0,
        high: 2.0,
        low: 0.5,
        close: 1.5,
        volume: 1,
    };
    store.insert_missing("INFY", Interval::Daily, &[row]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut queue = failure_log(&dir);

    let settings = SyncSettings {
        intervals: vec![Interval::Daily],
        ..SyncSettings::default()
    };
    let outcome = {
        let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, settings);
        sync.process_pair("INFY", Interval::Daily, today()).unwrap()
    };
    assert_eq!(outcome, PairOutcome::Skipped);
    assert!(provider.calls().is_empty());
}

#[test]
fn empty_result_is_success_with_zero_rows() {
    let provider = ScriptedProvider {
        empty: ["DELISTED".to_string()].into_iter().collect(),
        ..ScriptedProvider::default()
    };
    let mut store = Warehouse::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut queue = failure_log(&dir);

    let report = {
        let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        sync.run(&symbols(&["DELISTED"]), today()).unwrap()
    };
    assert_eq!(report.done, 2);
    assert_eq!(report.empty, 2);
    assert_eq!(report.rows_inserted, 0);
    assert!(queue.list_pending().unwrap().is_empty());
}

#[test]
fn empty_initial_load_can_be_queued() {
    let provider = ScriptedProvider {
        empty: ["DELISTED".to_string()].into_iter().collect(),
        ..ScriptedProvider::default()
    };
    let mut store = Warehouse::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut queue = failure_log(&dir);
    let settings = SyncSettings {
        empty_initial_is_failure: true,
        intervals: vec![Interval::Daily],
        ..SyncSettings::default()
    };

    let outcome = {
        let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, settings);
        sync.process_pair("DELISTED", Interval::Daily, today()).unwrap()
    };
    match outcome {
        PairOutcome::Queued(failure) => {
            assert_eq!(failure.kind, FailureKind::EmptyInitial);
            assert_eq!(failure.stage, Stage::Fetch);
        }
        other => panic!("expected queued outcome, got {other:?}"),
    }
    assert_eq!(queue.list_pending().unwrap()[0].last_kind, FailureKind::EmptyInitial);
}

#[test]
fn merge_failure_is_queued_as_storage_error() {
    let provider = ScriptedProvider::default();
    let mut store = FlakyStore::new();
    store.broken_writes.insert("TCS".into());
    let dir = tempfile::tempdir().unwrap();
    let mut queue = failure_log(&dir);

    let report = {
        let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        sync.run(&symbols(&["INFY", "TCS"]), today()).unwrap()
    };
    assert_eq!(report.queued, 2);
    assert!(report
        .queued_pairs
        .iter()
        .all(|q| q.symbol == "TCS" && q.kind == FailureKind::StorageError));
    assert_eq!(store.inner.last_date("TCS", Interval::Daily).unwrap(), None);
    assert!(store.inner.last_date("INFY", Interval::Daily).unwrap().is_some());
}

#[test]
fn coverage_failure_is_queued_without_fetching() {
    let provider = ScriptedProvider::default();
    let mut store = FlakyStore::new();
    store.broken_reads.insert("TCS".into());
    let dir = tempfile::tempdir().unwrap();
    let mut queue = failure_log(&dir);

    let outcome = {
        let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
        sync.process_pair("TCS", Interval::Daily, today()).unwrap()
    };
    assert!(matches!(
        outcome,
        PairOutcome::Queued(ref f) if f.stage == Stage::Coverage && f.kind == FailureKind::StorageError
    ));
    assert!(provider.calls().is_empty());
}

#[test]
fn unwritable_queue_aborts_the_run() {
    let provider = ScriptedProvider::default();
    provider.fail("TCS", Interval::Daily, u32::MAX);
    let mut store = Warehouse::open_in_memory().unwrap();
    let mut queue = BrokenQueue;

    let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, SyncSettings::default());
    let err = sync.run(&symbols(&["TCS", "WIPRO"]), today()).unwrap_err();
    assert!(matches!(err, SyncError::Queue(_)));
}

#[test]
fn concurrent_fetching_matches_sequential_result() {
    let universe = symbols(&["ABB", "HDFC", "INFY", "TCS", "WIPRO"]);

    let sequential = ScriptedProvider::default();
    sequential.fail("INFY", Interval::Weekly, u32::MAX);
    let mut seq_store = Warehouse::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut seq_queue = FailureLog::new(dir.path().join("seq.txt"));
    let seq_report = {
        let mut sync = Synchronizer::new(&sequential, &mut seq_store, &mut seq_queue, SyncSettings::default());
        sync.run(&universe, today()).unwrap()
    };

    let parallel = ScriptedProvider::default();
    parallel.fail("INFY", Interval::Weekly, u32::MAX);
    let mut par_store = Warehouse::open_in_memory().unwrap();
    let mut par_queue = FailureLog::new(dir.path().join("par.txt"));
    let settings = SyncSettings {
        fetch_workers: 3,
        ..SyncSettings::default()
    };
    let par_report = {
        let mut sync = Synchronizer::new(&parallel, &mut par_store, &mut par_queue, settings);
        sync.run(&universe, today()).unwrap()
    };

    assert_eq!(seq_report.done, par_report.done);
    assert_eq!(seq_report.queued, par_report.queued);
    assert_eq!(seq_report.rows_inserted, par_report.rows_inserted);
    assert_eq!(seq_report.queued_pairs, par_report.queued_pairs);
    for interval in Interval::ALL {
        assert_eq!(
            seq_store.coverage_report(interval).unwrap(),
            par_store.coverage_report(interval).unwrap()
        );
    }
    assert_eq!(parallel.calls().len(), 10);
}

// ── No duplicates under arbitrary run schedules ─────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// However the run days are spaced, stored rows stay unique and gap-free.
    #[test]
    fn repeated_runs_never_duplicate(steps in prop::collection::vec(0i64..12, 1..6)) {
        let provider = ScriptedProvider::default();
        let mut store = Warehouse::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut queue = failure_log(&dir);
        let settings = SyncSettings {
            daily_lookback_days: 60,
            weekly_lookback_days: 60,
            ..SyncSettings::default()
        };

        let mut day = d(2024, 1, 3);
        for step in steps {
            day += Duration::days(step);
            let mut sync = Synchronizer::new(&provider, &mut store, &mut queue, settings.clone());
            sync.run(&symbols(&["INFY"]), day).unwrap();
        }

        for interval in Interval::ALL {
            let rows = store.load_rows("INFY", interval).unwrap();
            for pair in rows.windows(2) {
                prop_assert!(pair[0].date < pair[1].date);
            }
            let expected = bar_dates(interval, rows[0].date, rows.last().unwrap().date);
            prop_assert_eq!(rows.len(), expected.len());
        }
    }
}
