//! Sync planner: bring the quote store current, one day at a time.
//!
//! The window runs from the day after the latest stored date (or
//! `today - lookback_days` for an empty store) through `today`. Weekends are
//! skipped without a request. Every weekday is fetched, normalized and merged
//! before the next one starts, so an interrupted sync keeps the days it
//! finished and the next run resumes after them.
//!
//! Fetch and storage failures are logged and absorbed here; they never reach
//! the caller.

use super::provider::{upstream_error, DataError, ProviderSession, QuoteProvider};
use super::quotes::normalize;
use super::store::QuoteStore;
use chrono::{Datelike, Days, NaiveDate, Weekday};
use tracing::{error, info, warn};

/// Upper bound on the history fetched into an empty store (about 100 years).
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

/// Options controlling a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Days of history to fetch when the store is empty.
    pub lookback_days: u32,
    /// Conflict policy passed to [`QuoteStore::merge`].
    pub overwrite_duplicates: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            lookback_days: 60,
            overwrite_duplicates: true,
        }
    }
}

/// Summary of a sync run over a non-empty window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Calendar days in the window, weekends included.
    pub days_considered: usize,
    /// Weekdays a fetch was attempted for.
    pub weekdays_fetched: usize,
    /// Rows fetched and merged. Weekends never contribute.
    pub records_downloaded: usize,
    /// Weekdays whose data could not be fetched or persisted.
    pub failed_days: Vec<NaiveDate>,
}

impl SyncReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed_days.is_empty()
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Inclusive `(start, end)` window to fetch, or `None` when already current.
///
/// `lookback_days` is capped at [`MAX_LOOKBACK_DAYS`]; a start outside the
/// calendar range yields no window.
pub fn plan_window(
    latest: Option<NaiveDate>,
    today: NaiveDate,
    lookback_days: u32,
) -> Option<(NaiveDate, NaiveDate)> {
    let start = match latest {
        Some(d) => d.succ_opt()?,
        None => {
            let lookback = lookback_days.min(MAX_LOOKBACK_DAYS);
            today.checked_sub_days(Days::new(u64::from(lookback)))?
        }
    };
    (start <= today).then_some((start, today))
}

/// Sync the store through `today`.
///
/// Returns `None` when there is nothing to do (store already current, or the
/// store is unreadable and no window can be planned).
pub fn sync(
    store: &QuoteStore,
    provider: &dyn QuoteProvider,
    today: NaiveDate,
    opts: &SyncOptions,
) -> Option<SyncReport> {
    let latest = match store.latest_date() {
        Ok(latest) => latest,
        Err(e) => {
            error!(store = %store.path().display(), error = %e, "quote store unreadable, skipping sync");
            return None;
        }
    };

    let Some((start, end)) = plan_window(latest, today, opts.lookback_days) else {
        info!(?latest, "quote store already current");
        return None;
    };

    let days: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();
    let total = days.len();
    let mut report = SyncReport {
        start,
        end,
        days_considered: total,
        weekdays_fetched: 0,
        records_downloaded: 0,
        failed_days: Vec::new(),
    };

    let session = match ProviderSession::open(provider) {
        Ok(session) => session,
        Err(e) => {
            error!(provider = provider.name(), error = %e, "provider login failed");
            report.failed_days = days.into_iter().filter(|d| !is_weekend(*d)).collect();
            return Some(report);
        }
    };

    for (i, date) in days.into_iter().enumerate() {
        let progress = (i + 1) as f64 / total as f64 * 100.0;

        if is_weekend(date) {
            info!("Skipping weekend {date} Progress {progress:.2}%");
            continue;
        }

        report.weekdays_fetched += 1;
        match sync_day(store, &session, date, opts.overwrite_duplicates) {
            Ok(records) => {
                report.records_downloaded += records;
                info!("Downloading data for {date} ({records} records): Progress {progress:.2}%");
            }
            Err(e) => {
                error!(%date, error = %e, "day sync failed; continuing with 0 records");
                report.failed_days.push(date);
            }
        }
    }

    drop(session);

    if !report.all_succeeded() {
        warn!(failed = ?report.failed_days, "sync finished with failed days");
    }
    Some(report)
}

/// Fetch, normalize and merge a single weekday. Returns the rows merged.
fn sync_day(
    store: &QuoteStore,
    session: &ProviderSession<'_>,
    date: NaiveDate,
    overwrite_duplicates: bool,
) -> Result<usize, DataError> {
    let quotes = session
        .fetch_quotes(date)
        .map_err(|e| upstream_error(date, e))?;
    let rows = normalize(quotes).map_err(|e| upstream_error(date, e))?;
    let records = rows.len();
    if records > 0 {
        store.merge(rows, overwrite_duplicates)?;
    }
    Ok(records)
}
