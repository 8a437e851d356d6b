//! Instrument catalog: the ordered universe of symbols to synchronize.
//!
//! Loaded from an exchange listing CSV. Only the symbol column is required;
//! name, listing date, ISIN and market cap are picked up when present.

use crate::domain::Instrument;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

const SYMBOL_HEADERS: &[&str] = &["symbol"];
const NAME_HEADERS: &[&str] = &["name of company", "company_name", "name"];
const LISTING_HEADERS: &[&str] = &["date of listing", "date_of_listing", "listing_date"];
const ISIN_HEADERS: &[&str] = &["isin number", "isin"];
const MARKET_CAP_HEADERS: &[&str] = &["market cap", "market_cap"];

const DATE_FORMATS: &[&str] = &["%d-%m-%Y", "%d-%b-%Y", "%d/%m/%Y", "%Y-%m-%d"];
const PLACEHOLDERS: &[&str] = &["not available", "na", "n/a", "nan", "-", "--"];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed catalog CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("catalog has no symbol column (headers: {headers})")]
    MissingSymbolColumn { headers: String },

    #[error("catalog contains no symbols")]
    Empty,
}

/// Read-only, symbol-ordered sequence of instruments.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    instruments: Vec<Instrument>,
}

#[derive(Debug, Default)]
struct Columns {
    symbol: usize,
    name: Option<usize>,
    listing_date: Option<usize>,
    isin: Option<usize>,
    market_cap: Option<usize>,
}

impl Catalog {
    /// Load a catalog from a CSV file.
    pub fn from_csv_path(path: &Path) -> Result<Self, CatalogError> {
        let file = std::fs::File::open(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(file)
    }

    /// Parse a catalog from any CSV source with a header row.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let columns = resolve_columns(&headers)?;

        let mut by_symbol: BTreeMap<String, Instrument> = BTreeMap::new();
        for record in rdr.records() {
            let record = record?;
            let Some(symbol) = field(&record, Some(columns.symbol)) else {
                continue;
            };
            let symbol = symbol.to_ascii_uppercase();
            if by_symbol.contains_key(&symbol) {
                debug!(%symbol, "duplicate catalog row ignored");
                continue;
            }

            let listing_date = field(&record, columns.listing_date).and_then(|raw| {
                let parsed = parse_listing_date(raw);
                if parsed.is_none() {
                    warn!(%symbol, value = raw, "unparseable listing date");
                }
                parsed
            });

            let instrument = Instrument {
                symbol: symbol.clone(),
                name: field(&record, columns.name).map(str::to_string),
                listing_date,
                isin: field(&record, columns.isin).map(str::to_string),
                market_cap: field(&record, columns.market_cap).and_then(parse_market_cap),
            };
            by_symbol.insert(symbol, instrument);
        }

        if by_symbol.is_empty() {
            return Err(CatalogError::Empty);
        }

        Ok(Self {
            instruments: by_symbol.into_values().collect(),
        })
    }

    /// Catalog of bare symbols, e.g. from a `--symbols` override.
    pub fn from_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut by_symbol = BTreeMap::new();
        for s in symbols {
            let symbol = s.as_ref().trim().to_ascii_uppercase();
            if symbol.is_empty() {
                continue;
            }
            by_symbol
                .entry(symbol.clone())
                .or_insert_with(|| Instrument::new(symbol));
        }
        Self {
            instruments: by_symbol.into_values().collect(),
        }
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    /// Symbols in catalog order.
    pub fn symbols(&self) -> Vec<String> {
        self.instruments.iter().map(|i| i.symbol.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Restrict the catalog to the given symbols, keeping catalog order.
    ///
    /// Requested symbols absent from the catalog are kept as bare instruments.
    pub fn filter<S: AsRef<str>>(&self, symbols: &[S]) -> Self {
        let wanted = Self::from_symbols(symbols.iter().map(|s| s.as_ref()));
        let instruments = wanted
            .instruments
            .into_iter()
            .map(|bare| {
                self.instruments
                    .iter()
                    .find(|i| i.symbol == bare.symbol)
                    .cloned()
                    .unwrap_or(bare)
            })
            .collect();
        Self { instruments }
    }
}

fn resolve_columns(headers: &csv::StringRecord) -> Result<Columns, CatalogError> {
    let normalized: Vec<String> = headers
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_ascii_lowercase())
        .collect();
    let find = |aliases: &[&str]| normalized.iter().position(|h| aliases.contains(&h.as_str()));

    let symbol = find(SYMBOL_HEADERS).ok_or_else(|| CatalogError::MissingSymbolColumn {
        headers: normalized.join(", "),
    })?;

    Ok(Columns {
        symbol,
        name: find(NAME_HEADERS),
        listing_date: find(LISTING_HEADERS),
        isin: find(ISIN_HEADERS),
        market_cap: find(MARKET_CAP_HEADERS),
    })
}

/// Non-placeholder value of a column, if present.
fn field(record: &csv::StringRecord, idx: Option<usize>) -> Option<&str> {
    let value = record.get(idx?)?.trim();
    if value.is_empty() || PLACEHOLDERS.contains(&value.to_ascii_lowercase().as_str()) {
        None
    } else {
        Some(value)
    }
}

/// Parse a day-first listing date.
pub fn parse_listing_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
}

/// Parse a market cap like `1,23,456.78 Cr`: commas dropped, leading number kept.
pub fn parse_market_cap(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    let number: String = cleaned
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    number.parse::<f64>().ok().filter(|v| v.is_finite())
}
