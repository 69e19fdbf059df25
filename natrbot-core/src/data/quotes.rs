//! Canonical quote schema and the normalizer for raw provider responses.
//!
//! Providers answer a daily-quotes query with one columnar document per date:
//! parallel arrays keyed `Code`, `Date`, `Open`, ... The wire struct names every
//! field explicitly, so a renamed or missing upstream column fails the parse as
//! [`DataError::SchemaDrift`] instead of silently producing an empty column.

use super::provider::DataError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One security's trading record for one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRow {
    pub code: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub amount: f64,
}

impl QuoteRow {
    /// Numeric fields in storage order.
    pub fn numeric_fields(&self) -> [f64; 6] {
        [
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.amount,
        ]
    }

    /// True when every numeric field is a finite number.
    pub fn is_clean(&self) -> bool {
        self.numeric_fields().iter().all(|v| v.is_finite())
    }
}

/// Security codes arrive as strings from most brokers, but some serialize
/// numeric-looking codes as JSON numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawCode {
    Text(String),
    Number(serde_json::Number),
}

impl RawCode {
    fn canonical(&self) -> String {
        match self {
            RawCode::Text(s) => canonical_code(s),
            RawCode::Number(n) => canonical_code(&n.to_string()),
        }
    }
}

/// Columnar daily-quotes document as served by the upstream provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyQuotes {
    #[serde(rename = "Code", alias = "code")]
    pub code: Vec<RawCode>,
    #[serde(rename = "Date", alias = "date")]
    pub date: Vec<String>,
    #[serde(rename = "Open", alias = "open")]
    pub open: Vec<Option<f64>>,
    #[serde(rename = "High", alias = "high")]
    pub high: Vec<Option<f64>>,
    #[serde(rename = "Low", alias = "low")]
    pub low: Vec<Option<f64>>,
    #[serde(rename = "Close", alias = "close")]
    pub close: Vec<Option<f64>>,
    #[serde(rename = "Volume", alias = "volume")]
    pub volume: Vec<Option<f64>>,
    #[serde(rename = "Amount", alias = "amount")]
    pub amount: Vec<Option<f64>>,
}

impl DailyQuotes {
    /// Parse a provider JSON body.
    pub fn from_json(body: &str) -> Result<Self, DataError> {
        serde_json::from_str(body)
            .map_err(|e| DataError::SchemaDrift(format!("daily quotes body: {e}")))
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Build a document from canonical rows (used by replay fixtures).
    pub fn from_rows(rows: &[QuoteRow]) -> Self {
        let mut doc = DailyQuotes::default();
        for row in rows {
            doc.code.push(RawCode::Text(row.code.clone()));
            doc.date.push(row.date.format("%Y-%m-%d").to_string());
            doc.open.push(Some(row.open));
            doc.high.push(Some(row.high));
            doc.low.push(Some(row.low));
            doc.close.push(Some(row.close));
            doc.volume.push(Some(row.volume));
            doc.amount.push(Some(row.amount));
        }
        doc
    }
}

/// Convert a provider document into canonical rows.
///
/// Missing numeric values become NaN; they stay in the store and are dropped
/// later by [`crate::indicators::clean_rows`]. Rows with a blank code are skipped.
pub fn normalize(quotes: DailyQuotes) -> Result<Vec<QuoteRow>, DataError> {
    let n = quotes.code.len();
    let lengths = [
        ("date", quotes.date.len()),
        ("open", quotes.open.len()),
        ("high", quotes.high.len()),
        ("low", quotes.low.len()),
        ("close", quotes.close.len()),
        ("volume", quotes.volume.len()),
        ("amount", quotes.amount.len()),
    ];
    for (name, len) in lengths {
        if len != n {
            return Err(DataError::SchemaDrift(format!(
                "column '{name}' has {len} values, expected {n}"
            )));
        }
    }

    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        let code = quotes.code[i].canonical();
        if code.is_empty() {
            continue;
        }
        let date = parse_quote_date(&quotes.date[i])?;
        rows.push(QuoteRow {
            code,
            date,
            open: quotes.open[i].unwrap_or(f64::NAN),
            high: quotes.high[i].unwrap_or(f64::NAN),
            low: quotes.low[i].unwrap_or(f64::NAN),
            close: quotes.close[i].unwrap_or(f64::NAN),
            volume: quotes.volume[i].unwrap_or(f64::NAN),
            amount: quotes.amount[i].unwrap_or(f64::NAN),
        });
    }
    Ok(rows)
}

/// Dates arrive as `YYYY-MM-DD`, optionally followed by a time part.
pub fn parse_quote_date(raw: &str) -> Result<NaiveDate, DataError> {
    let trimmed = raw.trim();
    let day = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| DataError::SchemaDrift(format!("invalid date '{raw}': {e}")))
}

/// Canonical string form of a security code.
///
/// Codes are compared as strings everywhere. Surrounding whitespace is dropped
/// and a float-rendered integer (`2330.0`) collapses to its integer text, so a
/// code that passed through a numeric column still matches its string twin.
pub fn canonical_code(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(int_part) = trimmed.strip_suffix(".0") {
        if !int_part.is_empty() && int_part.chars().all(|c| c.is_ascii_digit()) {
            return int_part.to_string();
        }
    }
    trimmed.to_string()
}
