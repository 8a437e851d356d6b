//! Quote provider trait and structured error types.
//!
//! The QuoteProvider trait abstracts over the remote quote source so the
//! synchronizer can be driven by the Yahoo chart API in production and by a
//! scripted double in tests.

use crate::domain::Interval;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider-shaped OHLCV bar, before normalization.
///
/// Any field may be missing; `normalize` decides what survives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<u64>,
}

/// Structured error types for provider calls.
///
/// Every variant ends up as free text in the failure log; no variant is
/// treated as a permanent verdict on the symbol.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("provider blocked requests (circuit breaker open)")]
    CircuitBreakerTripped,

    #[error("provider error: {0}")]
    Other(String),
}

/// Result of a successful provider call for one symbol and interval.
///
/// `bars` may be empty: a closed market or a delisted symbol is not an error.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub symbol: String,
    pub interval: Interval,
    pub bars: Vec<RawBar>,
}

/// Trait for quote providers.
///
/// `start` and `end` are both inclusive. Implementations must be callable
/// from several worker threads at once.
pub trait QuoteProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch OHLCV bars for a symbol and interval over a date range.
    fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}
