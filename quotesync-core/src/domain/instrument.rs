use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// An exchange-listed instrument from the catalog.
///
/// Only `symbol` drives synchronization. The listing date is kept for
/// reference and is never used to bound fetch ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub name: Option<String>,
    pub listing_date: Option<NaiveDate>,
    pub isin: Option<String>,
    pub market_cap: Option<f64>,
}

impl Instrument {
    /// Instrument with a symbol and no descriptive metadata.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: None,
            listing_date: None,
            isin: None,
            market_cap: None,
        }
    }
}
