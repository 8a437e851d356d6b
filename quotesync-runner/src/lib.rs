//! quotesync runner: incremental OHLCV synchronization.
//!
//! This crate builds on `quotesync-core` to provide:
//! - Configuration loaded from TOML
//! - Coverage tracking (what each pair is missing)
//! - Range fetching with normalization at the provider boundary
//! - Insert-missing-only merging into the warehouse
//! - The durable failure queue
//! - The synchronization orchestrator and the reprocessing pass

pub mod config;
pub mod coverage;
pub mod failure_queue;
pub mod fetcher;
pub mod merge;
pub mod reprocess;
pub mod stats;
pub mod sync;

pub use config::{ConfigError, SyncConfig, SyncSettings};
pub use coverage::{CoverageTracker, MissingRange};
pub use failure_queue::{
    FailureKind, FailureLog, FailureQueue, FailureRecord, PendingSymbol, QueueError,
};
pub use fetcher::{FetchedRange, RangeFetcher};
pub use merge::{MergeReport, MergeWriter};
pub use reprocess::Reprocessor;
pub use stats::{QueuedPair, ReprocessReport, SyncReport};
pub use sync::{PairFailure, PairOutcome, Stage, SyncError, Synchronizer};
