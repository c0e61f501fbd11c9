use std::env;
use std::time::Duration;

use crosscheck_client::{ClientConfig, UploadLimits};
use tracing::info;

use crate::error::ConfigError;

const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_POLL_INITIAL_DELAY_MS: u64 = 1_000;
const DEFAULT_PAGE_SIZE: u64 = 100;

/// Timing and sizing knobs for the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Gap between workflow status polls.
    pub poll_interval: Duration,
    /// Wait before the first poll after analysis starts.
    pub poll_initial_delay: Duration,
    /// Sessions fetched per history listing.
    pub page_size: u64,
    pub upload_limits: UploadLimits,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poll_initial_delay: Duration::from_millis(DEFAULT_POLL_INITIAL_DELAY_MS),
            page_size: DEFAULT_PAGE_SIZE,
            upload_limits: UploadLimits::default(),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub client: ClientConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from `CROSSCHECK_*` environment variables.
    /// Unset variables fall back to defaults; malformed numbers are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let client = ClientConfig {
            base_url: lookup("CROSSCHECK_API_URL").unwrap_or(defaults.client.base_url),
            api_prefix: lookup("CROSSCHECK_API_PREFIX").unwrap_or(defaults.client.api_prefix),
            request_timeout: match number(&lookup, "CROSSCHECK_REQUEST_TIMEOUT_SECS")? {
                Some(secs) => Duration::from_secs(secs),
                None => defaults.client.request_timeout,
            },
        };

        let store = StoreConfig {
            poll_interval: match number(&lookup, "CROSSCHECK_POLL_INTERVAL_MS")? {
                Some(ms) => Duration::from_millis(ms),
                None => defaults.store.poll_interval,
            },
            poll_initial_delay: match number(&lookup, "CROSSCHECK_POLL_INITIAL_DELAY_MS")? {
                Some(ms) => Duration::from_millis(ms),
                None => defaults.store.poll_initial_delay,
            },
            page_size: number(&lookup, "CROSSCHECK_PAGE_SIZE")?.unwrap_or(defaults.store.page_size),
            upload_limits: defaults.store.upload_limits,
        };

        if store.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "CROSSCHECK_POLL_INTERVAL_MS",
                expected: "a positive number of milliseconds",
                value: "0".to_string(),
            });
        }

        Ok(Self { client, store })
    }

    /// Log the effective configuration.
    pub fn log_summary(&self) {
        info!(
            api_root = %self.client.api_root(),
            request_timeout_secs = self.client.request_timeout.as_secs(),
            poll_interval_ms = self.store.poll_interval.as_millis() as u64,
            poll_initial_delay_ms = self.store.poll_initial_delay.as_millis() as u64,
            page_size = self.store.page_size,
            "Configuration loaded"
        );
    }
}

fn number(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<u64>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key,
                expected: "a non-negative integer",
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.client.api_root(), "http://localhost:8000/api/v1");
        assert_eq!(config.store.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_lookup(lookup(&[
            ("CROSSCHECK_API_URL", "https://qc.example.com"),
            ("CROSSCHECK_API_PREFIX", "/api/v2"),
            ("CROSSCHECK_REQUEST_TIMEOUT_SECS", "5"),
            ("CROSSCHECK_POLL_INTERVAL_MS", " 2500 "),
            ("CROSSCHECK_PAGE_SIZE", "25"),
        ]))
        .unwrap();
        assert_eq!(config.client.api_root(), "https://qc.example.com/api/v2");
        assert_eq!(config.client.request_timeout, Duration::from_secs(5));
        assert_eq!(config.store.poll_interval, Duration::from_millis(2500));
        assert_eq!(config.store.poll_initial_delay, Duration::from_secs(1));
        assert_eq!(config.store.page_size, 25);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = Config::from_lookup(lookup(&[("CROSSCHECK_PAGE_SIZE", "lots")])).unwrap_err();
        assert!(err.to_string().contains("CROSSCHECK_PAGE_SIZE"));

        assert!(Config::from_lookup(lookup(&[("CROSSCHECK_POLL_INTERVAL_MS", "0")])).is_err());
    }
}
