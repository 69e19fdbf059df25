//! Offline provider that replays recorded daily-quote documents.
//!
//! Layout: `{dir}/{YYYY-MM-DD}.json`, one provider response per date. A date
//! without a file is a day with no quotes.

use super::provider::{DataError, QuoteProvider};
use super::quotes::DailyQuotes;
use chrono::NaiveDate;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

pub struct ReplayQuoteProvider {
    dir: PathBuf,
}

impl ReplayQuoteProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn day_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    /// Record a document for `date` (used to build fixtures).
    pub fn record(&self, date: NaiveDate, quotes: &DailyQuotes) -> Result<(), DataError> {
        fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_string_pretty(quotes)
            .map_err(|e| DataError::Store(format!("replay serialization: {e}")))?;
        fs::write(self.day_path(date), body)?;
        Ok(())
    }
}

impl QuoteProvider for ReplayQuoteProvider {
    fn name(&self) -> &str {
        "replay"
    }

    fn login(&self) -> Result<(), DataError> {
        if self.dir.is_dir() {
            Ok(())
        } else {
            Err(DataError::AuthenticationRequired(format!(
                "replay directory {} does not exist",
                self.dir.display()
            )))
        }
    }

    fn fetch_quotes(&self, date: NaiveDate) -> Result<DailyQuotes, DataError> {
        match fs::read_to_string(self.day_path(date)) {
            Ok(body) => DailyQuotes::from_json(&body),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DailyQuotes::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn logout(&self) {}
}
