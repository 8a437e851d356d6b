//! Domain types for quotesync

pub mod bar;
pub mod instrument;
pub mod interval;

pub use bar::OhlcvRow;
pub use instrument::Instrument;
pub use interval::{Interval, ParseIntervalError, DEFAULT_LOOKBACK_DAYS};
