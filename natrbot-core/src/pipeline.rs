//! Request orchestration: sync, compute, join, write.
//!
//! A [`Pipeline`] owns the quote store behind a mutex. Each request holds the
//! lock while it syncs and reads the store, so two requests through the same
//! pipeline never interleave their merges. Indicator computation, the join and
//! the output write happen after the lock is released.

use crate::config::AppConfig;
use crate::data::{sync, DataError, QuoteProvider, QuoteStore, StoreStats, SyncOptions, SyncReport};
use crate::enrich::{enrich, RequestTable};
use crate::indicators::{clean_rows, compute_natr, IndicatorRow};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Outcome of one enrichment request.
#[derive(Debug, Clone)]
pub struct EnrichReport {
    pub output: PathBuf,
    pub rows: usize,
    pub matched: usize,
    pub snapshot_date: Option<NaiveDate>,
    pub caption: String,
    /// `None` when offline, or when the store was already current.
    pub sync: Option<SyncReport>,
}

pub struct Pipeline {
    store: Mutex<QuoteStore>,
    provider: Box<dyn QuoteProvider>,
    sync_options: SyncOptions,
    period: usize,
}

impl Pipeline {
    pub fn new(
        store: QuoteStore,
        provider: Box<dyn QuoteProvider>,
        sync_options: SyncOptions,
        period: usize,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            provider,
            sync_options,
            period,
        }
    }

    pub fn from_config(config: &AppConfig, provider: Box<dyn QuoteProvider>) -> Self {
        Self::new(
            QuoteStore::new(&config.store.path),
            provider,
            config.sync_options(),
            config.indicator.period,
        )
    }

    pub fn period(&self) -> usize {
        self.period
    }

    fn lock_store(&self) -> MutexGuard<'_, QuoteStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring the store current through `today`, logging store stats around it.
    pub fn sync_now(&self, today: NaiveDate) -> Option<SyncReport> {
        let store = self.lock_store();
        self.sync_locked(&store, today)
    }

    fn sync_locked(&self, store: &QuoteStore, today: NaiveDate) -> Option<SyncReport> {
        log_stats(store, "before sync");
        let report = sync(store, self.provider.as_ref(), today, &self.sync_options);
        if let Some(report) = &report {
            info!(
                start = %report.start,
                end = %report.end,
                days = report.days_considered,
                records = report.records_downloaded,
                failed = report.failed_days.len(),
                "sync complete"
            );
            log_stats(store, "after sync");
        }
        report
    }

    pub fn stats(&self) -> Result<Option<StoreStats>, PipelineError> {
        Ok(self.lock_store().stats()?)
    }

    /// The most recent `last` indicator rows for one code, oldest first.
    pub fn natr_for(&self, code: &str, last: usize) -> Result<Vec<IndicatorRow>, PipelineError> {
        let code = crate::data::canonical_code(code);
        let rows: Vec<_> = read_or_empty(&self.lock_store())?
            .into_iter()
            .filter(|r| r.code == code)
            .collect();
        let mut out = compute_natr(clean_rows(rows), self.period);
        let skip = out.len().saturating_sub(last);
        out.drain(..skip);
        Ok(out)
    }

    /// Serve one enrichment request.
    ///
    /// Unless `offline`, the store is synced through `today` first. On any
    /// error no output file is written.
    pub fn process(
        &self,
        input: &Path,
        output: Option<&Path>,
        today: NaiveDate,
        offline: bool,
    ) -> Result<EnrichReport, PipelineError> {
        let output = match output {
            Some(path) => path.to_path_buf(),
            None => output_path_for(input)?,
        };
        if output == input {
            return Err(PipelineError::InvalidRequest(format!(
                "output would overwrite input {}",
                input.display()
            )));
        }

        let request = RequestTable::from_csv(input)?;
        info!(input = %input.display(), codes = request.height(), "processing request");

        let (sync_report, rows) = {
            let store = self.lock_store();
            let report = if offline {
                None
            } else {
                self.sync_locked(&store, today)
            };
            (report, read_or_empty(&store)?)
        };

        let indicators = compute_natr(clean_rows(rows), self.period);
        let mut enriched = enrich(&request, &indicators)?;
        if enriched.snapshot_date.is_none() {
            warn!("no stored quotes; output carries empty indicator columns");
        }
        enriched.write_csv(&output)?;

        let caption = enriched.caption();
        info!(output = %output.display(), matched = enriched.matched, "{caption}");
        Ok(EnrichReport {
            output,
            rows: enriched.table.height(),
            matched: enriched.matched,
            snapshot_date: enriched.snapshot_date,
            caption,
            sync: sync_report,
        })
    }
}

/// Default output location: `out_{filename}` beside the input.
pub fn output_path_for(input: &Path) -> Result<PathBuf, PipelineError> {
    let name = input.file_name().ok_or_else(|| {
        PipelineError::InvalidRequest(format!("input has no file name: {}", input.display()))
    })?;
    let mut out_name = std::ffi::OsString::from("out_");
    out_name.push(name);
    Ok(input.with_file_name(out_name))
}

fn read_or_empty(store: &QuoteStore) -> Result<Vec<crate::data::QuoteRow>, DataError> {
    match store.read_all() {
        Ok(rows) => Ok(rows),
        Err(DataError::StoreNotFound { .. }) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

fn log_stats(store: &QuoteStore, stage: &str) {
    match store.stats() {
        Ok(Some(s)) => info!(
            stage,
            earliest = %s.earliest_date,
            latest = %s.latest_date,
            rows = s.row_count,
            codes = s.code_count,
            hash = %s.data_hash,
            "parquet stats"
        ),
        Ok(None) => info!(stage, "parquet stats: store empty"),
        Err(e) => warn!(stage, error = %e, "parquet stats unavailable"),
    }
}
