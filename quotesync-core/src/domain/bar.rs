//! OhlcvRow: the unit stored in the warehouse.

use super::Interval;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One normalized OHLCV bar for a single symbol, interval and date.
///
/// `(symbol, interval, date)` is the natural key; the warehouse never holds
/// two rows with the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRow {
    pub symbol: String,
    pub interval: Interval,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl OhlcvRow {
    /// Basic OHLC sanity check: finite positive prices, high/low bracket open and close.
    pub fn is_sane(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
    }
}
