//! Quote provider trait, session guard, and structured error types.
//!
//! The QuoteProvider trait abstracts over upstream sources (the brokerage HTTP
//! API, replayed JSON files) so the sync planner can be driven by a mock in tests.

use super::quotes::DailyQuotes;
use chrono::NaiveDate;
use thiserror::Error;
use tracing::info;

/// Structured error types for data operations.
///
/// These are designed to be displayable in both CLI and bot contexts.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("quote store not found: {path}")]
    StoreNotFound { path: String },

    #[error("upstream fetch failed for {date}: {reason}")]
    UpstreamFetch { date: NaiveDate, reason: String },

    #[error("upstream schema changed: {0}")]
    SchemaDrift(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for upstream quote providers.
///
/// A provider serves the whole market's daily quotes for one date per call.
/// Session lifecycle (login/logout) is bracketed by [`ProviderSession`];
/// the store and planner sit above this trait and providers know nothing about them.
pub trait QuoteProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Open an authenticated session.
    fn login(&self) -> Result<(), DataError>;

    /// Fetch every security's quote for a single trading date.
    fn fetch_quotes(&self, date: NaiveDate) -> Result<DailyQuotes, DataError>;

    /// Close the session. Must be safe to call after a failed fetch.
    fn logout(&self);

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}

/// Scoped provider session: logs in on open, logs out on drop.
pub struct ProviderSession<'a> {
    provider: &'a dyn QuoteProvider,
}

impl<'a> ProviderSession<'a> {
    pub fn open(provider: &'a dyn QuoteProvider) -> Result<Self, DataError> {
        provider.login()?;
        info!(provider = provider.name(), "provider session opened");
        Ok(Self { provider })
    }

    pub fn fetch_quotes(&self, date: NaiveDate) -> Result<DailyQuotes, DataError> {
        if !self.provider.is_available() {
            return Err(DataError::CircuitBreakerTripped);
        }
        self.provider.fetch_quotes(date)
    }
}

impl Drop for ProviderSession<'_> {
    fn drop(&mut self) {
        self.provider.logout();
        info!(provider = self.provider.name(), "provider session closed");
    }
}

/// Wrap any provider failure for `date` as an [`DataError::UpstreamFetch`].
pub(crate) fn upstream_error(date: NaiveDate, err: DataError) -> DataError {
    match err {
        e @ DataError::UpstreamFetch { .. } => e,
        other => DataError::UpstreamFetch {
            date,
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProvider {
        logins: AtomicUsize,
        logouts: AtomicUsize,
        fail_login: bool,
    }

    impl QuoteProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn login(&self) -> Result<(), DataError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            if self.fail_login {
                return Err(DataError::AuthenticationRequired("bad key".into()));
            }
            Ok(())
        }

        fn fetch_quotes(&self, date: NaiveDate) -> Result<DailyQuotes, DataError> {
            Err(DataError::UpstreamFetch {
                date,
                reason: "offline".into(),
            })
        }

        fn logout(&self) {
            self.logouts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn session_logs_out_on_drop_even_after_errors() {
        let provider = CountingProvider::default();
        {
            let session = ProviderSession::open(&provider).unwrap();
            let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
            assert!(session.fetch_quotes(day).is_err());
        }
        assert_eq!(provider.logins.load(Ordering::SeqCst), 1);
        assert_eq!(provider.logouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_login_never_logs_out() {
        let provider = CountingProvider {
            fail_login: true,
            ..Default::default()
        };
        assert!(ProviderSession::open(&provider).is_err());
        assert_eq!(provider.logouts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn upstream_error_keeps_date_and_reason() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let err = upstream_error(day, DataError::NetworkUnreachable("timeout".into()));
        let msg = err.to_string();
        assert!(msg.contains("2024-06-03"), "{msg}");
        assert!(msg.contains("timeout"), "{msg}");
    }
}
