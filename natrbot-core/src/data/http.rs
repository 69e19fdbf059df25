//! Brokerage HTTP quote provider.
//!
//! Session-based JSON API:
//! - `POST {base}/login` with `{api_key, secret_key}` → `{token}`
//! - `GET {base}/daily_quotes?date=YYYY-MM-DD` (bearer token) → [`DailyQuotes`]
//! - `POST {base}/logout`
//!
//! Each day fetch retries with exponential backoff and feeds the circuit breaker.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, QuoteProvider};
use super::quotes::DailyQuotes;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest server-requested wait honoured between retries.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Reported when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// API credentials. Loaded from the environment, never from the config file.
#[derive(Clone, Default, Serialize)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
}

impl Credentials {
    /// Read `API_KEY` and `SECRET_KEY`; unset variables become empty strings.
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("API_KEY").unwrap_or_default(),
            secret_key: std::env::var("SECRET_KEY").unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.is_empty() || self.secret_key.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

pub struct HttpQuoteProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    credentials: Credentials,
    token: Mutex<Option<String>>,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl HttpQuoteProvider {
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        timeout: Duration,
        max_retries: u32,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataError::NetworkUnreachable(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            token: Mutex::new(None),
            circuit_breaker,
            max_retries,
            base_delay: Duration::from_millis(500),
        })
    }

    fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }

    fn logout_url(&self) -> String {
        format!("{}/logout", self.base_url)
    }

    fn daily_quotes_url(&self, date: NaiveDate) -> String {
        format!("{}/daily_quotes?date={}", self.base_url, date.format("%Y-%m-%d"))
    }

    fn current_token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_token(&self, token: Option<String>) {
        *self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    fn breaker_open(&self) -> DataError {
        warn!(
            cooldown_secs = self.circuit_breaker.remaining_cooldown().as_secs(),
            "circuit breaker open, refusing request"
        );
        DataError::CircuitBreakerTripped
    }

    /// One day's request with retry and circuit breaker logic.
    fn fetch_with_retry(&self, date: NaiveDate) -> Result<DailyQuotes, DataError> {
        let token = self.current_token().ok_or_else(|| {
            DataError::AuthenticationRequired("fetch attempted without a session".into())
        })?;
        let url = self.daily_quotes_url(date);
        let mut last_error = None;
        let mut wait_hint = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = retry_delay(self.base_delay, attempt, wait_hint.take());
                debug!(%date, attempt, ?delay, "retrying daily quotes request");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(self.breaker_open());
            }

            let resp = match self.client.get(&url).bearer_auth(&token).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    self.circuit_breaker.record_failure();
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.to_string())),
            };

            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let action = classify_status(resp.status(), retry_after, date);
            record_outcome(&self.circuit_breaker, &action);

            match action {
                StatusAction::Parse => {
                    let body = resp
                        .text()
                        .map_err(|e| DataError::NetworkUnreachable(format!("read body: {e}")))?;
                    return DailyQuotes::from_json(&body);
                }
                StatusAction::NoSession => return Ok(DailyQuotes::default()),
                StatusAction::Retry { error, wait } => {
                    last_error = Some(error);
                    wait_hint = wait;
                }
                StatusAction::Trip => return Err(self.breaker_open()),
                StatusAction::Fail(error) => return Err(error),
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::UpstreamFetch {
            date,
            reason: "max retries exceeded".into(),
        }))
    }
}

/// What a daily quotes response status means for the request loop.
#[derive(Debug)]
enum StatusAction {
    /// Read the body as the day's quotes.
    Parse,
    /// No trading session on this date.
    NoSession,
    /// Transient failure; retry after at least `wait` when the server gave one.
    Retry {
        error: DataError,
        wait: Option<Duration>,
    },
    /// Key or IP blocked; open the breaker.
    Trip,
    Fail(DataError),
}

fn classify_status(status: StatusCode, retry_after: Option<u64>, date: NaiveDate) -> StatusAction {
    match status {
        StatusCode::FORBIDDEN => StatusAction::Trip,
        StatusCode::TOO_MANY_REQUESTS => StatusAction::Retry {
            error: DataError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            },
            wait: retry_after.map(Duration::from_secs),
        },
        StatusCode::UNAUTHORIZED => {
            StatusAction::Fail(DataError::AuthenticationRequired("session token rejected".into()))
        }
        StatusCode::NOT_FOUND => StatusAction::NoSession,
        s if s.is_success() => StatusAction::Parse,
        s => StatusAction::Retry {
            error: DataError::UpstreamFetch {
                date,
                reason: format!("HTTP {s}"),
            },
            wait: None,
        },
    }
}

/// Feed one response outcome to the breaker. A 401 is a session problem and
/// leaves it untouched.
fn record_outcome(breaker: &CircuitBreaker, action: &StatusAction) {
    match action {
        StatusAction::Parse | StatusAction::NoSession => breaker.record_success(),
        StatusAction::Retry { .. } => breaker.record_failure(),
        StatusAction::Trip => breaker.trip(),
        StatusAction::Fail(_) => {}
    }
}

/// Exponential backoff from `base`, stretched to a server-requested wait
/// capped at [`MAX_RETRY_AFTER`].
fn retry_delay(base: Duration, attempt: u32, requested: Option<Duration>) -> Duration {
    let backoff = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    match requested {
        Some(wait) => backoff.max(wait.min(MAX_RETRY_AFTER)),
        None => backoff,
    }
}

impl QuoteProvider for HttpQuoteProvider {
    fn name(&self) -> &str {
        "brokerage_http"
    }

    fn login(&self) -> Result<(), DataError> {
        if self.credentials.is_empty() {
            return Err(DataError::AuthenticationRequired(
                "API_KEY and SECRET_KEY must be set".into(),
            ));
        }
        if !self.circuit_breaker.is_allowed() {
            return Err(self.breaker_open());
        }

        let resp = self
            .client
            .post(self.login_url())
            .json(&self.credentials)
            .send()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DataError::AuthenticationRequired(format!(
                "login rejected: HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(DataError::NetworkUnreachable(format!(
                "login failed: HTTP {status}"
            )));
        }

        let login: LoginResponse = resp
            .json()
            .map_err(|e| DataError::SchemaDrift(format!("login response: {e}")))?;
        self.set_token(Some(login.token));
        Ok(())
    }

    fn fetch_quotes(&self, date: NaiveDate) -> Result<DailyQuotes, DataError> {
        self.fetch_with_retry(date)
    }

    fn logout(&self) {
        let Some(token) = self.current_token() else {
            return;
        };
        self.set_token(None);
        if let Err(e) = self
            .client
            .post(self.logout_url())
            .bearer_auth(token)
            .send()
            .and_then(|r| r.error_for_status())
        {
            warn!(error = %e, "logout request failed");
        }
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
