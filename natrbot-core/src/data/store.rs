//! Single-file Parquet quote store.
//!
//! Layout: one Parquet file holding every security's daily rows, sorted by
//! `(date, code)`, with at most one row per `(code, date)`.
//!
//! Features:
//! - Atomic writes (write to `{file}.tmp`, rename into place)
//! - Dedup-on-merge with a caller-chosen conflict policy
//! - Schema check on load (missing columns are reported, not guessed)
//!
//! Single-writer: concurrent read-modify-write cycles against one file can
//! drop rows. Callers serialize access (see [`crate::pipeline::Pipeline`]).

use super::provider::DataError;
use super::quotes::{parse_quote_date, QuoteRow};
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// `NaiveDate::num_days_from_ce` of 1970-01-01 (Polars dates count from the epoch).
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

const COLUMNS: [&str; 8] = [
    "code", "date", "open", "high", "low", "close", "volume", "amount",
];

/// Summary statistics for the stored history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub earliest_date: NaiveDate,
    pub latest_date: NaiveDate,
    pub row_count: usize,
    pub code_count: usize,
    /// BLAKE3 over the sorted rows; equal hashes mean equal contents.
    pub data_hash: String,
}

/// Outcome of a [`QuoteStore::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Rows in the store before the merge.
    pub existing: usize,
    /// Distinct `(code, date)` rows offered by the caller.
    pub incoming: usize,
    /// Stored rows replaced by incoming ones (overwrite mode).
    pub replaced: usize,
    /// Incoming rows dropped because the key was already stored (keep mode).
    pub discarded: usize,
    /// Rows in the store after the merge.
    pub total: usize,
}

/// The Parquet quote store.
#[derive(Debug, Clone)]
pub struct QuoteStore {
    path: PathBuf,
}

impl QuoteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the Parquet file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Sibling temp file used for atomic replacement.
    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Load the full history.
    ///
    /// A missing file is [`DataError::StoreNotFound`]; callers treat it as an
    /// empty history.
    pub fn read_all(&self) -> Result<Vec<QuoteRow>, DataError> {
        if !self.exists() {
            return Err(DataError::StoreNotFound {
                path: self.path.display().to_string(),
            });
        }
        let file = fs::File::open(&self.path)?;
        let df = ParquetReader::new(file)
            .finish()
            .map_err(|e| DataError::Parquet(format!("read {}: {e}", self.path.display())))?;
        dataframe_to_rows(&df)
    }

    /// Latest stored date, or `None` when the store is missing or empty.
    pub fn latest_date(&self) -> Result<Option<NaiveDate>, DataError> {
        match self.read_all() {
            Ok(rows) => Ok(rows.iter().map(|r| r.date).max()),
            Err(DataError::StoreNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replace the store contents with `rows`.
    ///
    /// Rows are sorted by `(date, code)` before writing. The write goes to a
    /// temp file first and is renamed over the old file, so a failure leaves
    /// the previous version intact.
    pub fn write(&self, rows: &[QuoteRow]) -> Result<(), DataError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut sorted: Vec<&QuoteRow> = rows.iter().collect();
        sorted.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.code.cmp(&b.code)));

        let mut df = rows_to_dataframe(&sorted)?;
        let tmp_path = self.tmp_path();
        let written = write_parquet(&mut df, &tmp_path).and_then(|()| {
            fs::rename(&tmp_path, &self.path)
                .map_err(|e| DataError::Store(format!("atomic rename failed: {e}")))
        });
        if written.is_err() {
            // Never leave a partial temp file behind.
            let _ = fs::remove_file(&tmp_path);
        }
        written
    }

    /// Merge `new_rows` into the store.
    ///
    /// For a `(code, date)` present on both sides, `overwrite_duplicates`
    /// keeps the incoming row, otherwise the stored row. Everything else from
    /// both sides is kept. Duplicates within `new_rows` collapse to the last
    /// occurrence. An empty `new_rows` leaves the file untouched.
    pub fn merge(
        &self,
        new_rows: Vec<QuoteRow>,
        overwrite_duplicates: bool,
    ) -> Result<MergeSummary, DataError> {
        let existing = match self.read_all() {
            Ok(rows) => rows,
            Err(DataError::StoreNotFound { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut incoming: BTreeMap<(NaiveDate, String), QuoteRow> = BTreeMap::new();
        for row in new_rows {
            incoming.insert((row.date, row.code.clone()), row);
        }

        let mut summary = MergeSummary {
            existing: existing.len(),
            incoming: incoming.len(),
            ..Default::default()
        };

        if incoming.is_empty() {
            summary.total = existing.len();
            return Ok(summary);
        }

        let mut merged: BTreeMap<(NaiveDate, String), QuoteRow> = BTreeMap::new();
        for row in existing {
            merged.insert((row.date, row.code.clone()), row);
        }
        // Stored files are already unique, but a foreign file may not be.
        summary.existing = merged.len();

        for (key, row) in incoming {
            match merged.get_mut(&key) {
                Some(stored) if overwrite_duplicates => {
                    *stored = row;
                    summary.replaced += 1;
                }
                Some(_) => summary.discarded += 1,
                None => {
                    merged.insert(key, row);
                }
            }
        }

        let rows: Vec<QuoteRow> = merged.into_values().collect();
        summary.total = rows.len();
        self.write(&rows)?;
        Ok(summary)
    }

    /// Date range, size, and content hash of the stored history.
    ///
    /// `Ok(None)` when the store is missing or empty.
    pub fn stats(&self) -> Result<Option<StoreStats>, DataError> {
        let mut rows = match self.read_all() {
            Ok(rows) => rows,
            Err(DataError::StoreNotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        if rows.is_empty() {
            return Ok(None);
        }
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.code.cmp(&b.code)));

        let codes: BTreeSet<&str> = rows.iter().map(|r| r.code.as_str()).collect();
        let data_hash = blake3::hash(
            &serde_json::to_vec(&rows)
                .map_err(|e| DataError::Store(format!("hash serialization: {e}")))?,
        )
        .to_hex()
        .to_string();

        Ok(Some(StoreStats {
            earliest_date: rows[0].date,
            latest_date: rows[rows.len() - 1].date,
            row_count: rows.len(),
            code_count: codes.len(),
            data_hash,
        }))
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

pub(crate) fn date_to_epoch_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - EPOCH_DAYS_FROM_CE
}

fn epoch_days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + EPOCH_DAYS_FROM_CE)
}

/// Convert quote rows to a Polars DataFrame.
fn rows_to_dataframe(rows: &[&QuoteRow]) -> Result<DataFrame, DataError> {
    let codes: Vec<&str> = rows.iter().map(|r| r.code.as_str()).collect();
    let dates: Vec<i32> = rows.iter().map(|r| date_to_epoch_days(r.date)).collect();
    let opens: Vec<f64> = rows.iter().map(|r| r.open).collect();
    let highs: Vec<f64> = rows.iter().map(|r| r.high).collect();
    let lows: Vec<f64> = rows.iter().map(|r| r.low).collect();
    let closes: Vec<f64> = rows.iter().map(|r| r.close).collect();
    let volumes: Vec<f64> = rows.iter().map(|r| r.volume).collect();
    let amounts: Vec<f64> = rows.iter().map(|r| r.amount).collect();

    DataFrame::new(vec![
        Column::new("code".into(), codes),
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| DataError::Parquet(format!("date cast: {e}")))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("amount".into(), amounts),
    ])
    .map_err(|e| DataError::Parquet(format!("dataframe creation: {e}")))
}

/// Write a DataFrame to a Parquet file.
fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file = fs::File::create(path)?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

/// Read a numeric column as f64, mapping nulls to NaN.
fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<f64>, DataError> {
    let col = df
        .column(name)
        .map_err(|e| DataError::Parquet(format!("column read: {e}")))?
        .cast(&DataType::Float64)
        .map_err(|e| DataError::SchemaDrift(format!("'{name}' is not numeric: {e}")))?;
    let ca = col
        .f64()
        .map_err(|e| DataError::Parquet(format!("{name} column type: {e}")))?;
    Ok(ca.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// Read the `date` column. Older producers stored ISO strings instead of dates.
fn date_values(df: &DataFrame) -> Result<Vec<NaiveDate>, DataError> {
    let col = df
        .column("date")
        .map_err(|e| DataError::Parquet(format!("column read: {e}")))?;

    match col.dtype() {
        DataType::String => {
            let ca = col
                .str()
                .map_err(|e| DataError::Parquet(format!("date column type: {e}")))?;
            ca.iter()
                .enumerate()
                .map(|(i, v)| {
                    v.ok_or_else(|| DataError::Store(format!("null date at row {i}")))
                        .and_then(parse_quote_date)
                })
                .collect()
        }
        DataType::Date => {
            let days = col
                .cast(&DataType::Int32)
                .map_err(|e| DataError::Parquet(format!("date cast: {e}")))?;
            let ca = days
                .i32()
                .map_err(|e| DataError::Parquet(format!("date column type: {e}")))?;
            ca.iter()
                .enumerate()
                .map(|(i, v)| {
                    v.and_then(epoch_days_to_date)
                        .ok_or_else(|| DataError::Store(format!("null or invalid date at row {i}")))
                })
                .collect()
        }
        other => Err(DataError::SchemaDrift(format!(
            "date column has unsupported type {other}"
        ))),
    }
}

/// Convert a DataFrame back to quote rows.
fn dataframe_to_rows(df: &DataFrame) -> Result<Vec<QuoteRow>, DataError> {
    for col_name in &COLUMNS {
        if df.column(col_name).is_err() {
            return Err(DataError::SchemaDrift(format!(
                "store is missing column '{col_name}'"
            )));
        }
    }

    let code_col = df
        .column("code")
        .map_err(|e| DataError::Parquet(format!("column read: {e}")))?
        .cast(&DataType::String)
        .map_err(|e| DataError::Parquet(format!("code cast: {e}")))?;
    let code_ca = code_col
        .str()
        .map_err(|e| DataError::Parquet(format!("code column type: {e}")))?;

    let dates = date_values(df)?;
    let opens = f64_values(df, "open")?;
    let highs = f64_values(df, "high")?;
    let lows = f64_values(df, "low")?;
    let closes = f64_values(df, "close")?;
    let volumes = f64_values(df, "volume")?;
    let amounts = f64_values(df, "amount")?;

    let n = df.height();
    let mut rows = Vec::with_capacity(n);
    for (i, date) in dates.into_iter().enumerate() {
        let code = code_ca
            .get(i)
            .ok_or_else(|| DataError::Store(format!("null code at row {i}")))?;
        rows.push(QuoteRow {
            code: code.to_string(),
            date,
            open: opens[i],
            high: highs[i],
            low: lows[i],
            close: closes[i],
            volume: volumes[i],
            amount: amounts[i],
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn row(code: &str, d: u32, close: f64) -> QuoteRow {
        QuoteRow {
            code: code.to_string(),
            date: day(d),
            open: close - 1.0,
            high: close + 2.0,
            low: close - 2.0,
            close,
            volume: 1000.0,
            amount: close * 1000.0,
        }
    }

    fn temp_store() -> (tempfile::TempDir, QuoteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = QuoteStore::new(dir.path().join("daily_quotes.parquet"));
        (dir, store)
    }

    #[test]
    fn missing_store_reads_as_not_found() {
        let (_dir, store) = temp_store();
        assert!(matches!(
            store.read_all(),
            Err(DataError::StoreNotFound { .. })
        ));
        assert_eq!(store.latest_date().unwrap(), None);
        assert_eq!(store.stats().unwrap(), None);
    }

    #[test]
    fn merge_into_missing_store_is_plain_write() {
        let (_dir, store) = temp_store();
        let summary = store
            .merge(vec![row("2330", 3, 800.0), row("2317", 3, 150.0)], true)
            .unwrap();

        assert_eq!(summary.existing, 0);
        assert_eq!(summary.total, 2);
        let rows = store.read_all().unwrap();
        assert_eq!(rows.len(), 2);
        // Sorted by (date, code)
        assert_eq!(rows[0].code, "2317");
        assert_eq!(store.latest_date().unwrap(), Some(day(3)));
    }

    #[test]
    fn overwrite_replaces_stored_row() {
        let (_dir, store) = temp_store();
        store.merge(vec![row("2330", 3, 800.0)], true).unwrap();
        let summary = store
            .merge(vec![row("2330", 3, 900.0), row("2330", 4, 910.0)], true)
            .unwrap();

        assert_eq!(summary.replaced, 1);
        assert_eq!(summary.total, 2);
        let rows = store.read_all().unwrap();
        assert_eq!(rows[0].close, 900.0);
    }

    #[test]
    fn keep_mode_retains_stored_row() {
        let (_dir, store) = temp_store();
        store.merge(vec![row("2330", 3, 800.0)], true).unwrap();
        let summary = store
            .merge(vec![row("2330", 3, 900.0), row("2317", 3, 150.0)], false)
            .unwrap();

        assert_eq!(summary.discarded, 1);
        assert_eq!(summary.total, 2);
        let rows = store.read_all().unwrap();
        let tsmc = rows.iter().find(|r| r.code == "2330").unwrap();
        assert_eq!(tsmc.close, 800.0);
    }

    #[test]
    fn same_date_other_code_is_not_a_conflict() {
        let (_dir, store) = temp_store();
        store.merge(vec![row("2330", 3, 800.0)], true).unwrap();
        store.merge(vec![row("2317", 3, 150.0)], true).unwrap();
        assert_eq!(store.read_all().unwrap().len(), 2);
    }

    #[test]
    fn empty_merge_leaves_file_untouched() {
        let (_dir, store) = temp_store();
        store.merge(vec![row("2330", 3, 800.0)], true).unwrap();
        let before = fs::metadata(store.path()).unwrap().modified().unwrap();
        let summary = store.merge(Vec::new(), true).unwrap();
        let after = fs::metadata(store.path()).unwrap().modified().unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(before, after);
    }

    #[test]
    fn nan_values_survive_roundtrip() {
        let (_dir, store) = temp_store();
        let mut dirty = row("2330", 3, 800.0);
        dirty.volume = f64::NAN;
        store.write(&[dirty]).unwrap();
        let rows = store.read_all().unwrap();
        assert!(rows[0].volume.is_nan());
        assert!(!rows[0].is_clean());
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let (_dir, store) = temp_store();
        store.write(&[row("2330", 3, 800.0)]).unwrap();
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn failed_write_removes_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory at the store path makes the final rename fail.
        let path = dir.path().join("quotes.parquet");
        fs::create_dir_all(path.join("occupied")).unwrap();
        let store = QuoteStore::new(path.clone());

        let err = store.write(&[row("2330", 3, 800.0)]).unwrap_err();
        assert!(matches!(err, DataError::Store(_)));
        assert!(!store.tmp_path().exists());
        assert!(path.is_dir());
    }

    #[test]
    fn reads_string_dates_and_integer_volumes() {
        let (_dir, store) = temp_store();
        let mut df = df!(
            "code" => &["2330"],
            "date" => &["2024-06-03"],
            "open" => &[799.0],
            "high" => &[802.0],
            "low" => &[798.0],
            "close" => &[800.0],
            "volume" => &[1000i64],
            "amount" => &[800000i64],
        )
        .unwrap();
        write_parquet(&mut df, store.path()).unwrap();

        let rows = store.read_all().unwrap();
        assert_eq!(rows[0].date, day(3));
        assert_eq!(rows[0].volume, 1000.0);
    }

    #[test]
    fn missing_column_is_schema_drift() {
        let (_dir, store) = temp_store();
        let mut df = df!(
            "code" => &["2330"],
            "date" => &["2024-06-03"],
            "close" => &[800.0],
        )
        .unwrap();
        write_parquet(&mut df, store.path()).unwrap();

        assert!(matches!(store.read_all(), Err(DataError::SchemaDrift(_))));
    }

    #[test]
    fn stats_hash_tracks_content() {
        let (_dir, store) = temp_store();
        store.merge(vec![row("2330", 3, 800.0)], true).unwrap();
        let first = store.stats().unwrap().unwrap();
        store.merge(vec![row("2330", 3, 800.0)], true).unwrap();
        let same = store.stats().unwrap().unwrap();
        store.merge(vec![row("2330", 4, 805.0)], true).unwrap();
        let grown = store.stats().unwrap().unwrap();

        assert_eq!(first.data_hash, same.data_hash);
        assert_ne!(first.data_hash, grown.data_hash);
        assert_eq!(grown.row_count, 2);
        assert_eq!(grown.code_count, 1);
        assert_eq!(grown.earliest_date, day(3));
        assert_eq!(grown.latest_date, day(4));
    }
}
