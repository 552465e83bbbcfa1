//! Client configuration with sensible defaults.
//!
//! [`ApiConfig`] holds what the process supplies from outside: the base
//! address, an alternate address reported during preflight, and the retry
//! policy. [`ApiConfig::from_env`] reads the conventional environment
//! variables:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `CYPRESS_API_URL` | Alternate API URL, sent as `envUrl` during preflight |
//! | `API_RETRY_INTERVALS` | Comma-separated backoff delays in milliseconds |
//! | `DISABLE_API_RETRIES` | Any non-empty value runs every call exactly once |

use std::time::Duration;

use thiserror::Error;

use crate::retry::{BackoffSchedule, RetryPolicy};
use crate::routes::DEFAULT_API_URL;

pub const ENV_API_URL: &str = "CYPRESS_API_URL";
pub const ENV_RETRY_INTERVALS: &str = "API_RETRY_INTERVALS";
pub const ENV_DISABLE_RETRIES: &str = "DISABLE_API_RETRIES";

/// Invalid configuration input.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid retry interval `{0}`: expected a whole number of milliseconds")]
    InvalidInterval(String),
}

/// Configuration for a [`CloudApi`](crate::CloudApi).
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base address of the recording service. Default: `https://api.cypress.io/`.
    pub api_url: String,
    /// Alternate address reported to the service during preflight.
    pub env_url: Option<String>,
    /// Backoff schedule and disable switch.
    pub retry: RetryPolicy,
    /// Sent as `x-cypress-version`. Default: this crate's version.
    pub client_version: String,
    /// Sent as `x-os-name`. Default: the target OS.
    pub os_name: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            env_url: None,
            retry: RetryPolicy::default(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            os_name: std::env::consts::OS.to_string(),
        }
    }
}

impl ApiConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.env_url = lookup(ENV_API_URL).filter(|v| !v.is_empty());
        if let Some(intervals) = lookup(ENV_RETRY_INTERVALS).filter(|v| !v.is_empty()) {
            config.retry.schedule = parse_intervals(&intervals)?;
        }
        config.retry.disabled = lookup(ENV_DISABLE_RETRIES).is_some_and(|v| !v.is_empty());
        Ok(config)
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_env_url(mut self, url: impl Into<String>) -> Self {
        self.env_url = Some(url.into());
        self
    }

    pub fn with_retry_schedule(mut self, schedule: BackoffSchedule) -> Self {
        self.retry.schedule = schedule;
        self
    }

    pub fn with_retries_disabled(mut self, disabled: bool) -> Self {
        self.retry.disabled = disabled;
        self
    }

    pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }
}

/// Parse a comma-separated list of millisecond delays, e.g. `"1000,2000"`.
pub fn parse_intervals(list: &str) -> Result<BackoffSchedule, ConfigError> {
    list.split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidInterval(part.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(BackoffSchedule::new)
}
