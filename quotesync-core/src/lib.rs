//! quotesync core: domain types, quote provider, instrument catalog and warehouse.
//!
//! This crate holds everything the synchronizer touches but does not decide:
//! - Domain types (intervals, OHLCV rows, instruments)
//! - The `QuoteProvider` trait and the Yahoo chart implementation
//! - Normalization of provider bars into storable rows
//! - The instrument catalog loader
//! - The SQLite warehouse and its schema contract

pub mod data;
pub mod domain;
pub mod schema;
pub mod warehouse;

pub use warehouse::{Coverage, OhlcvStore, StoreError, Warehouse};
