// Sweep Configuration
//
// Built-in defaults, optionally overlaid by a JSON file, then by
// DELTASTREAM_* environment variables.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::http::HttpSettings;
use crate::retry::{RetryPolicy, DEFAULT_MAX_WAIT, DEFAULT_RETRY_INTERVAL};
use crate::sweep::{SweepOptions, DEFAULT_ENTITY_PREFIX};

pub const DEFAULT_URL: &str = "https://api.deltastream.io/v2";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{var} must be a whole number of seconds, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{0} is not set")]
    Missing(&'static str),
}

/// Connection and cleanup settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub url: String,
    pub api_token: Option<String>,
    pub organization_id: Option<String>,
    pub timezone: String,
    pub store: Option<String>,
    pub entity_prefix: String,
    pub max_wait_seconds: u64,
    pub retry_interval_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl SweepConfig {
    /// Default built-in configuration (used if no config is provided).
    pub fn default_config() -> Self {
        Self {
            url: DEFAULT_URL.into(),
            api_token: None,
            organization_id: None,
            timezone: "UTC".into(),
            store: None,
            entity_prefix: DEFAULT_ENTITY_PREFIX.into(),
            max_wait_seconds: DEFAULT_MAX_WAIT.as_secs(),
            retry_interval_seconds: DEFAULT_RETRY_INTERVAL.as_secs(),
            request_timeout_seconds: 60,
        }
    }

    /// Load a JSON config; missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Overlay the process environment.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Overlay values from `lookup`; empty values are ignored.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DELTASTREAM_URL") {
            self.url = url;
        }
        if let Some(token) = get("DELTASTREAM_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(org) = get("DELTASTREAM_ORGANIZATION_ID") {
            self.organization_id = Some(org);
        }
        if let Some(store) = get("DELTASTREAM_STORE") {
            self.store = Some(store);
        }
        if let Some(prefix) = get("DELTASTREAM_IT_PREFIX") {
            self.entity_prefix = prefix;
        }
        if let Some(value) = get("DELTASTREAM_MAX_WAIT_SECONDS") {
            self.max_wait_seconds = parse_seconds("DELTASTREAM_MAX_WAIT_SECONDS", value)?;
        }
        if let Some(value) = get("DELTASTREAM_RETRY_INTERVAL") {
            self.retry_interval_seconds = parse_seconds("DELTASTREAM_RETRY_INTERVAL", value)?;
        }
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.max_wait_seconds),
            Duration::from_secs(self.retry_interval_seconds),
        )
    }

    pub fn http_settings(&self) -> Result<HttpSettings, ConfigError> {
        Ok(HttpSettings {
            url: self.url.clone(),
            token: self
                .api_token
                .clone()
                .ok_or(ConfigError::Missing("DELTASTREAM_API_TOKEN"))?,
            organization_id: self
                .organization_id
                .clone()
                .ok_or(ConfigError::Missing("DELTASTREAM_ORGANIZATION_ID"))?,
            timezone: self.timezone.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
        })
    }

    pub fn sweep_options(&self) -> Result<SweepOptions, ConfigError> {
        let store = self.store.clone().ok_or(ConfigError::Missing("DELTASTREAM_STORE"))?;
        Ok(SweepOptions {
            entity_prefix: self.entity_prefix.clone(),
            policy: self.retry_policy(),
            ..SweepOptions::new(store)
        })
    }
}

fn parse_seconds(var: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_match_backend_conventions() {
        let config = SweepConfig::default_config();
        assert_eq!(config.url, "https://api.deltastream.io/v2");
        assert_eq!(config.entity_prefix, "dbte2e_");
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SweepConfig = serde_json::from_str(r#"{"store": "msk"}"#).unwrap();
        assert_eq!(config.store.as_deref(), Some("msk"));
        assert_eq!(config.max_wait_seconds, 300);
    }

    #[test]
    fn environment_overrides_config() {
        let config = SweepConfig::default_config()
            .with_overrides(env(&[
                ("DELTASTREAM_API_TOKEN", "tok"),
                ("DELTASTREAM_ORGANIZATION_ID", "org"),
                ("DELTASTREAM_MAX_WAIT_SECONDS", "30"),
                ("DELTASTREAM_RETRY_INTERVAL", " 2 "),
                ("DELTASTREAM_STORE", ""),
            ]))
            .unwrap();

        assert_eq!(config.retry_policy().max_wait, Duration::from_secs(30));
        assert_eq!(config.retry_policy().interval, Duration::from_secs(2));
        assert_eq!(config.http_settings().unwrap().token, "tok");
        assert!(matches!(
            config.sweep_options(),
            Err(ConfigError::Missing("DELTASTREAM_STORE"))
        ));
    }

    #[test]
    fn invalid_number_is_rejected() {
        let err = SweepConfig::default_config()
            .with_overrides(env(&[("DELTASTREAM_MAX_WAIT_SECONDS", "five")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
    }

    #[test]
    fn missing_credentials_are_reported() {
        let err = SweepConfig::default_config().http_settings().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DELTASTREAM_API_TOKEN")));
    }
}
