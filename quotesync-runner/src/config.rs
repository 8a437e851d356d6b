//! Synchronizer configuration.
//!
//! Loaded from a TOML file; every field has a default, so an empty file (or no
//! file at all) is a valid configuration. Unknown keys are rejected.

use chrono::Duration;
use quotesync_core::data::YahooConfig;
use quotesync_core::domain::{Interval, DEFAULT_LOOKBACK_DAYS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on `sync.freshness_slack_days`.
pub const MAX_FRESHNESS_SLACK_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level synchronizer configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub storage: StorageConfig,
    pub catalog: CatalogConfig,
    pub provider: ProviderConfig,
    pub sync: SyncSettings,
    pub logging: LoggingConfig,
}

/// Where data and the failure log live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub failure_log_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("db/market_data.sqlite"),
            failure_log_path: PathBuf::from("logs/failed_symbols.txt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    /// Exchange listing CSV.
    pub path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/EQUITY_L.csv"),
        }
    }
}

/// Quote provider connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub symbol_suffix: String,
    pub timeout_secs: u64,
    /// Transport-level retries per request; failed pairs are otherwise left to reprocessing.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Pause after every provider call.
    pub request_delay_ms: u64,
    pub breaker_cooldown_secs: u64,
    pub breaker_failure_threshold: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            symbol_suffix: ".NS".into(),
            timeout_secs: 30,
            max_retries: 0,
            retry_base_delay_ms: 500,
            request_delay_ms: 200,
            breaker_cooldown_secs: 30 * 60,
            breaker_failure_threshold: 3,
        }
    }
}

impl ProviderConfig {
    pub fn yahoo(&self) -> YahooConfig {
        YahooConfig {
            symbol_suffix: self.symbol_suffix.clone(),
            timeout: std::time::Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            base_delay: std::time::Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn request_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_delay_ms)
    }

    pub fn breaker_cooldown(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.breaker_cooldown_secs)
    }
}

/// Pipeline behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Intervals to synchronize, processed in this order.
    pub intervals: Vec<Interval>,
    pub daily_lookback_days: i64,
    pub weekly_lookback_days: i64,
    /// Days a pair may lag the latest possible bar and still count as up to date.
    pub freshness_slack_days: i64,
    /// Concurrent provider fetches. 1 runs the plain sequential scan.
    pub fetch_workers: usize,
    /// Queue pairs whose very first fetch returns no rows.
    pub empty_initial_is_failure: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            intervals: Interval::ALL.to_vec(),
            daily_lookback_days: DEFAULT_LOOKBACK_DAYS,
            weekly_lookback_days: DEFAULT_LOOKBACK_DAYS,
            freshness_slack_days: 0,
            fetch_workers: 1,
            empty_initial_is_failure: false,
        }
    }
}

impl SyncSettings {
    /// Provider history cap for an interval.
    pub fn lookback(&self, interval: Interval) -> Duration {
        match interval {
            Interval::Daily => Duration::days(self.daily_lookback_days),
            Interval::Weekly => Duration::days(self.weekly_lookback_days),
        }
    }

    /// Configured intervals in canonical order (daily before weekly), deduplicated.
    pub fn ordered_intervals(&self) -> Vec<Interval> {
        let mut intervals = self.intervals.clone();
        intervals.sort();
        intervals.dedup();
        intervals
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub file_name: String,
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Rotate the log file at startup once it exceeds this size.
    pub max_bytes: u64,
    /// Rotated files kept (`.1` newest).
    pub backups: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            file_name: "quotesync.log".into(),
            level: "info".into(),
            max_bytes: 5 * 1024 * 1024,
            backups: 3,
        }
    }
}

impl LoggingConfig {
    pub fn file_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

impl SyncConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sync = &self.sync;
        if sync.intervals.is_empty() {
            return Err(ConfigError::Invalid("sync.intervals must not be empty".into()));
        }
        for (key, days) in [
            ("daily_lookback_days", sync.daily_lookback_days),
            ("weekly_lookback_days", sync.weekly_lookback_days),
        ] {
            if !(1..=DEFAULT_LOOKBACK_DAYS).contains(&days) {
                return Err(ConfigError::Invalid(format!(
                    "sync.{key} must be between 1 and {DEFAULT_LOOKBACK_DAYS} (provider history cap), got {days}"
                )));
            }
        }
        if !(0..=MAX_FRESHNESS_SLACK_DAYS).contains(&sync.freshness_slack_days) {
            return Err(ConfigError::Invalid(format!(
                "sync.freshness_slack_days must be between 0 and {MAX_FRESHNESS_SLACK_DAYS}, got {}",
                sync.freshness_slack_days
            )));
        }
        if sync.fetch_workers == 0 {
            return Err(ConfigError::Invalid("sync.fetch_workers must be at least 1".into()));
        }
        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::Invalid("provider.timeout_secs must be positive".into()));
        }
        Ok(())
    }
}
