//! Quote acquisition and instrument loading

pub mod catalog;
pub mod circuit_breaker;
pub mod normalize;
pub mod provider;
pub mod yahoo;

pub use catalog::{Catalog, CatalogError};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use normalize::{normalize, AnomalyReport, AnomalyType, Normalized};
pub use provider::{DataError, FetchResult, QuoteProvider, RawBar};
pub use yahoo::{YahooConfig, YahooProvider};
