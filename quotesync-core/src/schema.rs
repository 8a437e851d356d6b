//! Warehouse schema contract: the boundary between the synchronizer and readers.
//!
//! Defines the exact column names, declared SQLite types and keys of the
//! OHLCV tables. Checked against existing database files when they are opened.

use crate::domain::Interval;
use serde::{Deserialize, Serialize};

/// Declared SQLite column types used by the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaType {
    /// ISO-8601 date or free text.
    Text,
    Real,
    Integer,
}

impl SchemaType {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Real => "REAL",
            Self::Integer => "INTEGER",
        }
    }

    /// Map a declared type from `PRAGMA table_info`.
    pub fn from_declared(decl: &str) -> Option<Self> {
        match decl.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Some(Self::Text),
            "REAL" | "DOUBLE" => Some(Self::Real),
            "INTEGER" | "BIGINT" => Some(Self::Integer),
            _ => None,
        }
    }
}

/// A single column of an OHLCV table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: &'static str,
    pub dtype: SchemaType,
}

/// Columns shared by `ohlcv_daily` and `ohlcv_weekly`.
///
/// - Primary key: `(symbol, date)`
/// - Dates: ISO-8601 text, the bar's exchange-local date
/// - Volume: non-negative integer
pub const OHLCV_SCHEMA: &[SchemaField] = &[
    SchemaField {
        name: "symbol",
        dtype: SchemaType::Text,
    },
    SchemaField {
        name: "date",
        dtype: SchemaType::Text,
    },
    SchemaField {
        name: "open",
        dtype: SchemaType::Real,
    },
    SchemaField {
        name: "high",
        dtype: SchemaType::Real,
    },
    SchemaField {
        name: "low",
        dtype: SchemaType::Real,
    },
    SchemaField {
        name: "close",
        dtype: SchemaType::Real,
    },
    SchemaField {
        name: "volume",
        dtype: SchemaType::Integer,
    },
];

const INSTRUMENTS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS instruments (
    symbol          TEXT PRIMARY KEY,
    company_name    TEXT,
    date_of_listing TEXT,
    isin            TEXT,
    market_cap      REAL
);
"#;

/// DDL for one OHLCV table.
pub fn ohlcv_table_sql(interval: Interval) -> String {
    let columns: Vec<String> = OHLCV_SCHEMA
        .iter()
        .map(|f| format!("    {} {} NOT NULL", f.name, f.dtype.sql()))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{},\n    PRIMARY KEY (symbol, date)\n) WITHOUT ROWID;\n",
        interval.table(),
        columns.join(",\n")
    )
}

/// Full warehouse DDL, idempotent.
pub fn schema_sql() -> String {
    let mut sql = String::new();
    for interval in Interval::ALL {
        sql.push_str(&ohlcv_table_sql(interval));
    }
    sql.push_str(INSTRUMENTS_SQL);
    sql
}

/// Result of schema validation.
#[derive(Debug, Clone)]
pub struct SchemaValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Validate `(column_name, declared_type)` pairs of an existing table against the contract.
pub fn validate_schema(columns: &[(String, Option<SchemaType>)]) -> SchemaValidation {
    let mut errors = Vec::new();

    for expected in OHLCV_SCHEMA {
        match columns.iter().find(|(name, _)| name == expected.name) {
            Some((_, Some(dtype))) if *dtype == expected.dtype => {}
            Some((_, dtype)) => {
                errors.push(format!(
                    "column '{}': expected {:?}, got {:?}",
                    expected.name, expected.dtype, dtype
                ));
            }
            None => {
                errors.push(format!("missing required column '{}'", expected.name));
            }
        }
    }

    for (name, _) in columns {
        if !OHLCV_SCHEMA.iter().any(|f| f.name == name) {
            errors.push(format!("unexpected column '{name}' (not in schema)"));
        }
    }

    SchemaValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}
