//! Enrichment join: annotate a user code list with the latest indicator snapshot.
//!
//! The snapshot is every indicator row at the single latest date in the table.
//! The request table drives a left join on its first column, so the output has
//! exactly one row per request row, in request order, with all request columns
//! kept and the indicator columns appended.

use crate::data::quotes::canonical_code;
use crate::data::store::date_to_epoch_days;
use crate::data::DataError;
use crate::indicators::IndicatorRow;
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Columns appended to the request table, in output order.
pub const INDICATOR_COLUMNS: [&str; 8] = [
    "date", "open", "high", "low", "close", "volume", "amount", "natr",
];

/// Rows scanned to infer the dtypes of the non-code request columns.
const INFER_SCHEMA_ROWS: usize = 10_000;

/// Uploaded code list. The first column holds security codes, always as
/// canonical strings; other columns are carried through untouched.
#[derive(Debug, Clone)]
pub struct RequestTable {
    df: DataFrame,
}

impl RequestTable {
    /// Read a CSV upload with a header row.
    pub fn from_csv(path: &Path) -> Result<Self, DataError> {
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
            // Codes such as "0050" must not lose their leading zeros.
            .with_dtype_overwrite(Some(Arc::new(vec![DataType::String])))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .map_err(|e| DataError::MalformedInput(format!("{}: {e}", path.display())))?
            .finish()
            .map_err(|e| DataError::MalformedInput(format!("{}: {e}", path.display())))?;
        Self::from_dataframe(df)
    }

    /// Validate a table and coerce its first column to canonical code strings.
    pub fn from_dataframe(mut df: DataFrame) -> Result<Self, DataError> {
        if df.width() == 0 {
            return Err(DataError::MalformedInput("table has no columns".into()));
        }
        if df.height() == 0 {
            return Err(DataError::MalformedInput("code list is empty".into()));
        }

        let first = df.get_columns()[0].clone();
        let as_text = first
            .cast(&DataType::String)
            .map_err(|e| DataError::MalformedInput(format!("code column: {e}")))?;
        let codes: Vec<Option<String>> = as_text
            .str()
            .map_err(|e| DataError::MalformedInput(format!("code column: {e}")))?
            .iter()
            .map(|v| v.map(canonical_code))
            .collect();

        df.with_column(Column::new(first.name().clone(), codes))
            .map_err(|e| DataError::MalformedInput(format!("code column: {e}")))?;
        Ok(Self { df })
    }

    /// Build a single-column table named `code` (used by callers that
    /// already hold the codes in memory).
    pub fn from_codes<S: AsRef<str>>(codes: &[S]) -> Result<Self, DataError> {
        let values: Vec<&str> = codes.iter().map(|c| c.as_ref()).collect();
        let df = DataFrame::new(vec![Column::new("code".into(), values)])
            .map_err(|e| DataError::MalformedInput(e.to_string()))?;
        Self::from_dataframe(df)
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn dataframe(&self) -> &DataFrame {
        &self.df
    }

    /// Canonical codes in row order; `None` for blank cells.
    pub fn codes(&self) -> Vec<Option<String>> {
        self.df.get_columns()[0]
            .str()
            .map(|ca| ca.iter().map(|v| v.map(str::to_string)).collect())
            .unwrap_or_default()
    }
}

/// Request table joined with the indicator snapshot.
#[derive(Debug, Clone)]
pub struct EnrichedOutput {
    pub table: DataFrame,
    /// Latest date across the indicator table; `None` when it is empty.
    pub snapshot_date: Option<NaiveDate>,
    /// Request rows that found a snapshot row.
    pub matched: usize,
}

impl EnrichedOutput {
    /// Short caption stating the as-of date of the data.
    pub fn caption(&self) -> String {
        match self.snapshot_date {
            Some(date) => format!("Data date: {}.", date.format("%Y-%m-%d")),
            None => "Data date: n/a.".to_string(),
        }
    }

    /// Write the table as CSV (header, no index column).
    ///
    /// Written to a temp file and renamed, so a failed write never leaves a
    /// partial output behind.
    pub fn write_csv(&mut self, path: &Path) -> Result<(), DataError> {
        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let mut file = fs::File::create(&tmp_path)?;
        let written = CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut self.table);
        drop(file);

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(DataError::Store(format!("write {}: {e}", path.display())));
        }
        fs::rename(&tmp_path, path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::Store(format!("rename output: {e}"))
        })?;
        Ok(())
    }
}

/// Rows at the latest date, keyed by code.
pub fn snapshot(rows: &[IndicatorRow]) -> (Option<NaiveDate>, HashMap<&str, &IndicatorRow>) {
    let latest = rows.iter().map(|r| r.quote.date).max();
    let by_code = rows
        .iter()
        .filter(|r| Some(r.quote.date) == latest)
        .map(|r| (r.quote.code.as_str(), r))
        .collect();
    (latest, by_code)
}

/// Left-join `request` against the latest snapshot of `indicators`.
pub fn enrich(
    request: &RequestTable,
    indicators: &[IndicatorRow],
) -> Result<EnrichedOutput, DataError> {
    let (snapshot_date, by_code) = snapshot(indicators);

    let hits: Vec<Option<&IndicatorRow>> = request
        .codes()
        .iter()
        .map(|code| code.as_deref().and_then(|c| by_code.get(c).copied()))
        .collect();
    let matched = hits.iter().filter(|h| h.is_some()).count();

    let field = |f: fn(&IndicatorRow) -> Option<f64>| -> Vec<Option<f64>> {
        hits.iter().map(|h| h.and_then(f)).collect()
    };
    let dates: Vec<Option<i32>> = hits
        .iter()
        .map(|h| h.map(|r| date_to_epoch_days(r.quote.date)))
        .collect();

    let mut table = request.dataframe().clone();
    // Indicator columns never replace a request column; a clash is suffixed
    // with `_right` until the name is free.
    let mut taken: HashSet<String> = table
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    let output_name = |name: &str| -> PlSmallStr {
        let mut candidate = name.to_string();
        while taken.contains(&candidate) {
            candidate.push_str("_right");
        }
        taken.insert(candidate.clone());
        candidate.into()
    };

    let [date, open, high, low, close, volume, amount, natr] = INDICATOR_COLUMNS.map(output_name);
    let date_col = Column::new(date, dates)
        .cast(&DataType::Date)
        .map_err(|e| DataError::Store(format!("date cast: {e}")))?;
    let columns = [
        date_col,
        Column::new(open, field(|r| Some(r.quote.open))),
        Column::new(high, field(|r| Some(r.quote.high))),
        Column::new(low, field(|r| Some(r.quote.low))),
        Column::new(close, field(|r| Some(r.quote.close))),
        Column::new(volume, field(|r| Some(r.quote.volume))),
        Column::new(amount, field(|r| Some(r.quote.amount))),
        Column::new(natr, field(|r| r.natr)),
    ];
    for column in columns {
        table
            .with_column(column)
            .map_err(|e| DataError::Store(format!("append column: {e}")))?;
    }

    Ok(EnrichedOutput {
        table,
        snapshot_date,
        matched,
    })
}
