//! Range Fetcher: one provider call per pair, normalized at the boundary.

use chrono::{Duration, NaiveDate};
use quotesync_core::data::{normalize, DataError, QuoteProvider};
use quotesync_core::domain::{Interval, OhlcvRow};
use std::time::Duration as StdDuration;
use tracing::{debug, info};

/// Normalized rows for one pair plus what the provider actually returned.
#[derive(Debug, Clone, Default)]
pub struct FetchedRange {
    /// Range actually requested after clamping.
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Bars the provider returned before normalization.
    pub raw_count: usize,
    /// Storable rows, strictly ascending, within `[start, end]`.
    pub rows: Vec<OhlcvRow>,
}

impl FetchedRange {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Fetches and normalizes one (symbol, interval, range) at a time.
pub struct RangeFetcher<'a> {
    provider: &'a dyn QuoteProvider,
    request_delay: StdDuration,
}

impl<'a> RangeFetcher<'a> {
    pub fn new(provider: &'a dyn QuoteProvider, request_delay: StdDuration) -> Self {
        Self {
            provider,
            request_delay,
        }
    }

    /// Fetch `[start, end]`, clamped to `lookback` days ending at `today`.
    ///
    /// Makes exactly one provider call unless the clamped range is empty.
    pub fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        start: NaiveDate,
        end: NaiveDate,
        today: NaiveDate,
        lookback: Duration,
    ) -> Result<FetchedRange, DataError> {
        let end = end.min(today);
        let start = start.max(today - lookback);
        if start > end {
            debug!(symbol, %interval, "clamped range is empty, nothing to fetch");
            return Ok(FetchedRange::default());
        }

        let result = self.provider.fetch(symbol, interval, start, end);
        if !self.request_delay.is_zero() {
            std::thread::sleep(self.request_delay);
        }
        let result = result?;

        let raw_count = result.bars.len();
        let normalized = normalize(symbol, interval, result.bars, start, end);
        if normalized.rows.is_empty() {
            info!(symbol, %interval, %start, %end, raw = raw_count, "provider returned no rows");
        } else {
            debug!(symbol, %interval, rows = normalized.rows.len(), "fetched");
        }

        Ok(FetchedRange {
            start: Some(start),
            end: Some(end),
            raw_count,
            rows: normalized.rows,
        })
    }
}
