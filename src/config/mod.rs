//! Configuration module for the application.
//!
//! Values come from the process environment (after `.env` is loaded), with
//! defaults for everything except the database URL.

use anyhow::Context;
use figment::{Figment, providers::Env};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// JSON document holding every named secret.
    #[serde(default = "default_secrets_file")]
    pub secrets_file: PathBuf,
    /// Side file recording when the current token was issued.
    #[serde(default = "default_token_stamp_file")]
    pub token_stamp_file: PathBuf,
    /// Wait between receiving a new token and first using it.
    #[serde(
        default = "default_token_settle_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub token_settle_delay: Duration,
    #[serde(default = "default_export_file")]
    pub export_file: PathBuf,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,
    /// Grace period for an interrupted run to finish its current pages.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Load from the environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(Figment::new().merge(Env::raw()))
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        figment.extract().context("Failed to load config")
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_secrets_file() -> PathBuf {
    PathBuf::from("secrets.json")
}

fn default_token_stamp_file() -> PathBuf {
    PathBuf::from("api_update.json")
}

fn default_token_settle_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_export_file() -> PathBuf {
    PathBuf::from("asset_data.json")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Accepts either an integer number of seconds or a duration string such as
/// `500ms`, `5s`, `2m` or `1h`.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationValue {
        Seconds(u64),
        Text(String),
    }

    match DurationValue::deserialize(deserializer)? {
        DurationValue::Seconds(secs) => Ok(Duration::from_secs(secs)),
        DurationValue::Text(text) => {
            let parsed = DurationParser::with_time_units(&[
                TimeUnit::MilliSecond,
                TimeUnit::Second,
                TimeUnit::Minute,
                TimeUnit::Hour,
            ])
            .parse(text.trim())
            .map_err(|e| serde::de::Error::custom(format!("invalid duration '{text}': {e}")))?;
            Duration::try_from(parsed)
                .map_err(|e| serde::de::Error::custom(format!("invalid duration '{text}': {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::{Format, Toml};

    fn config_from(toml: &str) -> anyhow::Result<Config> {
        Config::from_figment(Figment::from(Toml::string(toml)))
    }

    #[test]
    fn test_defaults() {
        let config = config_from("database_url = 'postgres://localhost/assets'").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.secrets_file, PathBuf::from("secrets.json"));
        assert_eq!(config.token_stamp_file, PathBuf::from("api_update.json"));
        assert_eq!(config.token_settle_delay, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_duration_strings_and_bare_seconds() {
        let config = config_from(
            r#"
            database_url = "postgres://localhost/assets"
            token_settle_delay = "250ms"
            request_timeout = 12
            shutdown_timeout = "2m"
            "#,
        )
        .unwrap();
        assert_eq!(config.token_settle_delay, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_secs(12));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_invalid_duration_is_rejected() {
        let err = config_from(
            r#"
            database_url = "postgres://localhost/assets"
            request_timeout = "soon"
            "#,
        )
        .unwrap_err();
        assert!(format!("{err:?}").contains("soon"), "{err:?}");
    }

    #[test]
    fn test_missing_database_url() {
        assert!(config_from("log_level = 'debug'").is_err());
    }
}
