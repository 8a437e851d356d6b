//! Normalization of provider bars into warehouse rows.
//!
//! Sorts, dedupes and bounds raw bars to the requested range. Rows that cannot
//! be stored are rejected; rows that can be stored but look wrong are kept and
//! reported, since dropping them would leave a hole the provider could have
//! filled.

use super::provider::RawBar;
use crate::domain::{Interval, OhlcvRow};
use chrono::NaiveDate;
use tracing::warn;

/// Outcome of normalizing one provider response.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Normalized {
    /// Rows strictly within the requested range, ascending by date, one per date.
    pub rows: Vec<OhlcvRow>,
    /// Bars missing a price or carrying a non-finite one.
    pub rejected: usize,
    /// Bars dated outside the requested range.
    pub out_of_range: usize,
    /// Bars sharing a date with an earlier bar.
    pub duplicates: usize,
    /// Kept rows that fail the OHLC sanity check.
    pub anomalies: Vec<AnomalyReport>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyReport {
    pub date: NaiveDate,
    pub anomaly_type: AnomalyType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyType {
    /// High/low do not bracket open and close.
    InvertedRange,
    /// A price at or below zero.
    NonPositivePrice,
}

/// Normalize raw bars for `symbol`/`interval` to the inclusive range `[start, end]`.
pub fn normalize(
    symbol: &str,
    interval: Interval,
    raw: Vec<RawBar>,
    start: NaiveDate,
    end: NaiveDate,
) -> Normalized {
    let mut out = Normalized::default();

    // Stable sort keeps provider order among equal dates, so dedupe keeps the first.
    let mut raw = raw;
    raw.sort_by_key(|b| b.date);

    let mut rows: Vec<OhlcvRow> = Vec::with_capacity(raw.len());
    for bar in raw {
        if bar.date < start || bar.date > end {
            out.out_of_range += 1;
            continue;
        }

        let (Some(open), Some(high), Some(low), Some(close)) = (bar.open, bar.high, bar.low, bar.close)
        else {
            out.rejected += 1;
            continue;
        };
        if ![open, high, low, close].iter().all(|p| p.is_finite()) {
            out.rejected += 1;
            continue;
        }

        if rows.last().is_some_and(|prev| prev.date == bar.date) {
            out.duplicates += 1;
            continue;
        }

        let row = OhlcvRow {
            symbol: symbol.to_string(),
            interval,
            date: bar.date,
            open,
            high,
            low,
            close,
            volume: bar.volume.unwrap_or(0),
        };
        if !row.is_sane() {
            let anomaly_type = if [open, high, low, close].iter().any(|p| *p <= 0.0) {
                AnomalyType::NonPositivePrice
            } else {
                AnomalyType::InvertedRange
            };
            out.anomalies.push(AnomalyReport {
                date: row.date,
                anomaly_type,
            });
        }
        rows.push(row);
    }
    out.rows = rows;

    if out.rejected > 0 {
        warn!(symbol, %interval, rejected = out.rejected, "dropped bars with missing or non-finite prices");
    }
    if !out.anomalies.is_empty() {
        warn!(symbol, %interval, anomalies = out.anomalies.len(), "kept bars failing OHLC sanity check");
    }

    out
}
