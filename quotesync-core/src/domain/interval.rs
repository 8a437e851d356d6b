//! Bar interval: which table a row lives in and how the provider is asked for it.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum history the quote provider serves for either interval.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 1825;

/// Bar interval synchronized into the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Daily,
    Weekly,
}

impl Interval {
    /// Both intervals, in the order a full run processes them.
    pub const ALL: [Interval; 2] = [Interval::Daily, Interval::Weekly];

    /// Single-letter code used in the failure log.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Daily => "D",
            Self::Weekly => "W",
        }
    }

    /// Warehouse table holding rows of this interval.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Daily => "ohlcv_daily",
            Self::Weekly => "ohlcv_weekly",
        }
    }

    /// Interval parameter understood by the chart API.
    pub fn provider_interval(&self) -> &'static str {
        match self {
            Self::Daily => "1d",
            Self::Weekly => "1wk",
        }
    }

    /// Most recent bar date that can exist on `today`.
    ///
    /// Daily bars exist on weekdays only; weekly bars are dated by the
    /// Monday that opens the week.
    pub fn latest_bar_date(&self, today: NaiveDate) -> NaiveDate {
        match self {
            Self::Daily => match today.weekday() {
                Weekday::Sat => today - Duration::days(1),
                Weekday::Sun => today - Duration::days(2),
                _ => today,
            },
            Self::Weekly => {
                today - Duration::days(today.weekday().num_days_from_monday() as i64)
            }
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => f.write_str("daily"),
            Self::Weekly => f.write_str("weekly"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown interval '{0}' (expected daily/D/1d or weekly/W/1wk)")]
pub struct ParseIntervalError(pub String);

impl FromStr for Interval {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "d" | "daily" | "1d" => Ok(Self::Daily),
            "w" | "weekly" | "1wk" => Ok(Self::Weekly),
            _ => Err(ParseIntervalError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parses_codes_and_names() {
        assert_eq!("D".parse::<Interval>().unwrap(), Interval::Daily);
        assert_eq!("weekly".parse::<Interval>().unwrap(), Interval::Weekly);
        assert_eq!(" 1wk ".parse::<Interval>().unwrap(), Interval::Weekly);
        assert!("monthly".parse::<Interval>().is_err());
    }

    #[test]
    fn daily_latest_bar_skips_weekend() {
        // 2024-06-08 is a Saturday
        assert_eq!(Interval::Daily.latest_bar_date(d(2024, 6, 8)), d(2024, 6, 7));
        assert_eq!(Interval::Daily.latest_bar_date(d(2024, 6, 9)), d(2024, 6, 7));
        assert_eq!(Interval::Daily.latest_bar_date(d(2024, 6, 10)), d(2024, 6, 10));
    }

    #[test]
    fn weekly_latest_bar_is_week_start() {
        assert_eq!(Interval::Weekly.latest_bar_date(d(2024, 6, 13)), d(2024, 6, 10));
        assert_eq!(Interval::Weekly.latest_bar_date(d(2024, 6, 10)), d(2024, 6, 10));
        assert_eq!(Interval::Weekly.latest_bar_date(d(2024, 6, 16)), d(2024, 6, 10));
    }

    #[test]
    fn tables_are_distinct() {
        assert_ne!(Interval::Daily.table(), Interval::Weekly.table());
    }
}
