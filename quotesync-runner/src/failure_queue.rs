//! Failure Queue: durable, append-only record of failed (symbol, interval) pairs.
//!
//! One CSV line per event, symbol first, no header:
//!
//! ```text
//! INFY,D,FETCH_ERROR,2024-06-12T10:00:00Z,network unreachable: timed out
//! INFY,*,RESOLVED,2024-06-13T10:00:00Z,
//! ```
//!
//! Clearing is logical: a `RESOLVED` line (interval `*` for the whole symbol or
//! a concrete code) retires every earlier failure it covers. Lines written by
//! the older tooling (`SYM,D,start,end,EMPTY_INITIAL` and `SYM,W,ERROR,<repr>`)
//! are read as failures.

use chrono::{DateTime, SecondsFormat, Utc};
use quotesync_core::domain::Interval;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failure log io error: {0}")]
    Io(#[from] io::Error),

    #[error("failure log csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Why a pair failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Provider call failed (network, rate limit, format change, unknown symbol...).
    FetchError,
    /// Coverage lookup or merge failed.
    StorageError,
    /// First ever fetch for the pair returned nothing.
    EmptyInitial,
    /// Written by older tooling without a classification.
    Unclassified,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchError => "FETCH_ERROR",
            Self::StorageError => "STORAGE_ERROR",
            Self::EmptyInitial => "EMPTY_INITIAL",
            Self::Unclassified => "UNCLASSIFIED",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "FETCH_ERROR" => Some(Self::FetchError),
            "STORAGE_ERROR" => Some(Self::StorageError),
            "EMPTY_INITIAL" => Some(Self::EmptyInitial),
            "UNCLASSIFIED" => Some(Self::Unclassified),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const RESOLVED: &str = "RESOLVED";
const ALL_INTERVALS: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Failed(FailureKind),
    Resolved,
}

/// One line of the failure log.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub symbol: String,
    /// `None` only on whole-symbol resolutions.
    pub interval: Option<Interval>,
    pub status: EntryStatus,
    /// Absent on legacy lines.
    pub attempted_at: Option<DateTime<Utc>>,
    pub reason: String,
}

/// A symbol with at least one unresolved failure.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSymbol {
    pub symbol: String,
    /// Intervals still failing, daily first.
    pub intervals: Vec<Interval>,
    pub first_failed_at: Option<DateTime<Utc>>,
    /// Unresolved failure entries across those intervals.
    pub attempts: usize,
    pub last_kind: FailureKind,
    pub last_reason: String,
}

/// Durable retry queue consulted by the reprocessing pass.
pub trait FailureQueue {
    /// Append a failure for one pair.
    fn record(
        &mut self,
        symbol: &str,
        interval: Interval,
        kind: FailureKind,
        reason: &str,
    ) -> Result<(), QueueError>;

    /// Distinct symbols with unresolved failures, ordered by first unresolved failure.
    fn list_pending(&self) -> Result<Vec<PendingSymbol>, QueueError>;

    /// Mark every entry of `symbol` resolved.
    fn clear(&mut self, symbol: &str) -> Result<(), QueueError>;

    /// Mark the entries of one interval of `symbol` resolved.
    fn resolve(&mut self, symbol: &str, interval: Interval) -> Result<(), QueueError>;

    /// Full history, in append order.
    fn records(&self) -> Result<Vec<FailureRecord>, QueueError>;
}

/// File-backed failure queue.
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(
        &self,
        symbol: &str,
        interval: &str,
        status: &str,
        reason: &str,
    ) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(file);

        let at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let reason = single_line(reason);
        writer.write_record([symbol, interval, status, at.as_str(), reason.as_str()])?;
        writer.flush()?;
        Ok(())
    }
}

impl FailureQueue for FailureLog {
    fn record(
        &mut self,
        symbol: &str,
        interval: Interval,
        kind: FailureKind,
        reason: &str,
    ) -> Result<(), QueueError> {
        self.append(symbol, interval.code(), kind.as_str(), reason)
    }

    fn list_pending(&self) -> Result<Vec<PendingSymbol>, QueueError> {
        Ok(pending_symbols(&self.records()?))
    }

    fn clear(&mut self, symbol: &str) -> Result<(), QueueError> {
        self.append(symbol, ALL_INTERVALS, RESOLVED, "")
    }

    fn resolve(&mut self, symbol: &str, interval: Interval) -> Result<(), QueueError> {
        self.append(symbol, interval.code(), RESOLVED, "")
    }

    fn records(&self) -> Result<Vec<FailureRecord>, QueueError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut records = Vec::new();
        // Byte records so one badly encoded line cannot hide the rest of the log.
        for (line_no, row) in rdr.byte_records().enumerate() {
            let row = row?;
            let owned: Vec<String> = row
                .iter()
                .map(|f| String::from_utf8_lossy(f).into_owned())
                .collect();
            let fields: Vec<&str> = owned.iter().map(String::as_str).collect();
            if fields.iter().all(|f| f.is_empty()) {
                continue;
            }
            match parse_line(&fields) {
                Some(record) => records.push(record),
                None => warn!(
                    path = %self.path.display(),
                    line = line_no + 1,
                    "skipping malformed failure log line"
                ),
            }
        }
        Ok(records)
    }
}

fn single_line(reason: &str) -> String {
    reason
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

fn parse_line(fields: &[&str]) -> Option<FailureRecord> {
    let symbol = fields.first().map(|s| s.trim()).filter(|s| !s.is_empty())?;
    let interval_field = fields.get(1)?.trim();
    let interval = if interval_field == ALL_INTERVALS {
        None
    } else {
        Some(interval_field.parse::<Interval>().ok()?)
    };
    let rest = &fields[2..];
    let head: Vec<&str> = rest.iter().map(|s| s.trim()).collect();

    // Current format: STATUS, timestamp, reason...
    if let [status, at, ..] = head.as_slice() {
        if let Ok(at) = DateTime::parse_from_rfc3339(at) {
            let status = if *status == RESOLVED {
                EntryStatus::Resolved
            } else {
                EntryStatus::Failed(FailureKind::parse(status)?)
            };
            if interval.is_none() && status != EntryStatus::Resolved {
                return None;
            }
            return Some(FailureRecord {
                symbol: symbol.to_string(),
                interval,
                status,
                attempted_at: Some(at.with_timezone(&Utc)),
                reason: rest[2..].join(","),
            });
        }
    }

    // Legacy lines always name a concrete interval.
    let interval = interval?;
    let (kind, reason) = match head.as_slice() {
        [start, end, "EMPTY_INITIAL"] => (
            FailureKind::EmptyInitial,
            format!("no data returned for {start}..{end}"),
        ),
        ["ERROR", ..] => (FailureKind::Unclassified, rest[1..].join(",").trim().to_string()),
        _ => (FailureKind::Unclassified, rest.join(",").trim().to_string()),
    };
    Some(FailureRecord {
        symbol: symbol.to_string(),
        interval: Some(interval),
        status: EntryStatus::Failed(kind),
        attempted_at: None,
        reason,
    })
}

/// Fold the log into the symbols that still have unresolved failures.
pub fn pending_symbols(records: &[FailureRecord]) -> Vec<PendingSymbol> {
    // (symbol, interval) -> indices of unresolved failures
    let mut open: HashMap<(&str, Interval), Vec<usize>> = HashMap::new();

    for (idx, record) in records.iter().enumerate() {
        match (record.status, record.interval) {
            (EntryStatus::Failed(_), Some(interval)) => {
                open.entry((record.symbol.as_str(), interval))
                    .or_default()
                    .push(idx);
            }
            (EntryStatus::Resolved, Some(interval)) => {
                open.remove(&(record.symbol.as_str(), interval));
            }
            (EntryStatus::Resolved, None) => {
                open.retain(|(symbol, _), _| *symbol != record.symbol);
            }
            (EntryStatus::Failed(_), None) => {}
        }
    }

    let mut by_symbol: HashMap<&str, Vec<(Interval, &[usize])>> = HashMap::new();
    for ((symbol, interval), indices) in &open {
        by_symbol
            .entry(*symbol)
            .or_default()
            .push((*interval, indices.as_slice()));
    }

    let mut pending: Vec<(usize, PendingSymbol)> = by_symbol
        .into_iter()
        .filter_map(|(symbol, mut entries)| {
            entries.sort_by_key(|(interval, _)| *interval);
            let mut all: Vec<usize> = entries.iter().flat_map(|(_, idx)| idx.iter().copied()).collect();
            all.sort_unstable();
            let first = *all.first()?;
            let last = &records[*all.last()?];
            let kind = match last.status {
                EntryStatus::Failed(kind) => kind,
                EntryStatus::Resolved => FailureKind::Unclassified,
            };
            Some((
                first,
                PendingSymbol {
                    symbol: symbol.to_string(),
                    intervals: entries.iter().map(|(interval, _)| *interval).collect(),
                    first_failed_at: records[first].attempted_at,
                    attempts: all.len(),
                    last_kind: kind,
                    last_reason: last.reason.clone(),
                },
            ))
        })
        .collect();

    pending.sort_by_key(|(first, _)| *first);
    pending.into_iter().map(|(_, p)| p).collect()
}
