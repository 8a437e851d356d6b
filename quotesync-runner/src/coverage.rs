//! Coverage Tracker: decides what date range a (symbol, interval) is missing.

use chrono::{Duration, NaiveDate};
use quotesync_core::domain::Interval;
use quotesync_core::{OhlcvStore, StoreError};

/// Date range a pair needs from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingRange {
    /// Nothing stored: the provider-capped window ending today.
    FullHistory { start: NaiveDate, end: NaiveDate },
    /// Day after the last stored date through today.
    TailGap { start: NaiveDate, end: NaiveDate },
    /// Stored data is current; nothing to fetch.
    UpToDate,
}

impl MissingRange {
    /// Inclusive bounds to fetch, `None` when up to date.
    pub fn bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        match *self {
            Self::FullHistory { start, end } | Self::TailGap { start, end } => Some((start, end)),
            Self::UpToDate => None,
        }
    }

    pub fn is_initial(&self) -> bool {
        matches!(self, Self::FullHistory { .. })
    }
}

/// Computes missing ranges from the stored maximum date.
///
/// Read-only: asking twice on the same day gives the same answer and writes nothing.
#[derive(Debug, Clone, Copy)]
pub struct CoverageTracker {
    /// Days a pair may trail the latest possible bar and still be current.
    pub freshness_slack: Duration,
}

impl Default for CoverageTracker {
    fn default() -> Self {
        Self {
            freshness_slack: Duration::zero(),
        }
    }
}

impl CoverageTracker {
    pub fn new(freshness_slack_days: i64) -> Self {
        Self {
            freshness_slack: Duration::days(freshness_slack_days.max(0)),
        }
    }

    /// Missing range for a pair as of `today`, capped to `lookback` days of history.
    pub fn missing_range(
        &self,
        store: &dyn OhlcvStore,
        symbol: &str,
        interval: Interval,
        today: NaiveDate,
        lookback: Duration,
    ) -> Result<MissingRange, StoreError> {
        let last = store.last_date(symbol, interval)?;
        Ok(self.range_after(last, interval, today, lookback))
    }

    /// Pure decision given the last stored date.
    pub fn range_after(
        &self,
        last: Option<NaiveDate>,
        interval: Interval,
        today: NaiveDate,
        lookback: Duration,
    ) -> MissingRange {
        let Some(last) = last else {
            return MissingRange::FullHistory {
                start: today - lookback,
                end: today,
            };
        };

        let latest_available = interval.latest_bar_date(today) - self.freshness_slack;
        if last >= latest_available || last >= today {
            return MissingRange::UpToDate;
        }

        // A gap older than the cap cannot be filled; fetch what the provider still serves.
        let start = (last + Duration::days(1)).max(today - lookback);
        MissingRange::TailGap { start, end: today }
    }
}
