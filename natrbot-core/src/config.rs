//! Application configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working setup. Provider credentials are never read from here; see
//! [`Credentials::from_env`](crate::data::Credentials::from_env).

use crate::data::{SyncOptions, MAX_LOOKBACK_DAYS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub indicator: IndicatorConfig,
    pub provider: ProviderConfig,
    pub request: RequestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Parquet file holding every stored quote.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("daily_quotes.parquet"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub lookback_days: u32,
    pub overwrite_duplicates: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let opts = SyncOptions::default();
        Self {
            lookback_days: opts.lookback_days,
            overwrite_duplicates: opts.overwrite_duplicates,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndicatorConfig {
    pub period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            period: crate::indicators::DEFAULT_PERIOD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// When set, quotes are replayed from `{replay_dir}/{YYYY-MM-DD}.json`
    /// instead of fetched over HTTP.
    pub replay_dir: Option<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            replay_dir: None,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RequestConfig {
    /// Where uploaded code lists and their outputs live.
    pub downloads_dir: PathBuf,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("downloads"),
        }
    }
}

impl AppConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.indicator.period == 0 {
            return Err(ConfigError::Invalid(
                "indicator.period must be at least 1".into(),
            ));
        }
        if !(1..=MAX_LOOKBACK_DAYS).contains(&self.sync.lookback_days) {
            return Err(ConfigError::Invalid(format!(
                "sync.lookback_days must be between 1 and {MAX_LOOKBACK_DAYS}"
            )));
        }
        if self.provider.replay_dir.is_none() && self.provider.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "provider.base_url is required without provider.replay_dir".into(),
            ));
        }
        Ok(())
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            lookback_days: self.sync.lookback_days,
            overwrite_duplicates: self.sync.overwrite_duplicates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.store.path, PathBuf::from("daily_quotes.parquet"));
        assert_eq!(config.sync.lookback_days, 60);
        assert!(config.sync.overwrite_duplicates);
        assert_eq!(config.indicator.period, 3);
        assert_eq!(config.provider.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn partial_sections_override() {
        let config = AppConfig::from_toml(
            r#"
[store]
path = "/var/lib/natrbot/quotes.parquet"

[sync]
overwrite_duplicates = false

[provider]
replay_dir = "fixtures/replay"
"#,
        )
        .unwrap();
        assert_eq!(
            config.store.path,
            PathBuf::from("/var/lib/natrbot/quotes.parquet")
        );
        let opts = config.sync_options();
        assert!(!opts.overwrite_duplicates);
        assert_eq!(opts.lookback_days, 60);
        assert_eq!(
            config.provider.replay_dir,
            Some(PathBuf::from("fixtures/replay"))
        );
    }

    #[test]
    fn zero_period_rejected() {
        let err = AppConfig::from_toml("[indicator]\nperiod = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_lookback_rejected() {
        let err = AppConfig::from_toml("[sync]\nlookback_days = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn huge_lookback_rejected() {
        let err = AppConfig::from_toml("[sync]\nlookback_days = 4000000000\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(AppConfig::from_toml("[sync]\nlookback_days = 36500\n").is_ok());
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let err = AppConfig::from_toml("[sync\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = AppConfig::from_file(Path::new("/nonexistent/natrbot.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
