//! Application-level configuration loading: scoring knobs, throttling windows and collaborator URLs.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TRAILHUNT_BACK_CONFIG_PATH";
/// Environment variable that overrides the scoring oracle endpoint.
const ORACLE_URL_ENV: &str = "SCORING_ORACLE_URL";

const DEFAULT_SUBMISSION_COOLDOWN: Duration = Duration::from_secs(5);
const DEFAULT_ORACLE_BUDGET: u64 = 20;
const DEFAULT_FALLBACK_FACTOR: f64 = 0.6;
const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(8);
const DEFAULT_POSITION_BROADCAST_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_PHOTO_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Minimum delay between two accepted submission attempts of a team.
    pub submission_cooldown: Duration,
    /// Number of prior submissions after which a team is scored without the oracle.
    pub oracle_budget: u64,
    /// Share of each weight granted when scoring falls back.
    pub fallback_factor: f64,
    /// Time budget for a single oracle call.
    pub oracle_timeout: Duration,
    /// Minimum delay between two pushed position broadcasts of a team.
    pub position_broadcast_interval: Duration,
    /// Delay after which photos of kids-safety sessions are purged.
    pub photo_retention: Duration,
    /// Snapshot polling period used while the push transport is down.
    pub poll_interval: Duration,
    /// Scoring oracle endpoint; scoring always falls back when unset.
    pub oracle_url: Option<String>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    ///
    /// `SCORING_ORACLE_URL` takes precedence over the file value.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        oracle_budget = config.oracle_budget,
                        fallback_factor = config.fallback_factor,
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.with_oracle_url(env::var(ORACLE_URL_ENV).ok())
    }

    /// Parse a JSON document; absent keys keep their default value.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Replace the oracle endpoint when `url` is a non-empty value.
    pub fn with_oracle_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|value| !value.trim().is_empty()) {
            self.oracle_url = Some(url);
        }
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    submission_cooldown_ms: Duration,
    oracle_budget: u64,
    fallback_factor: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    oracle_timeout_ms: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    position_broadcast_interval_ms: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    photo_retention_ms: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    poll_interval_ms: Duration,
    oracle_url: Option<String>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            submission_cooldown_ms: DEFAULT_SUBMISSION_COOLDOWN,
            oracle_budget: DEFAULT_ORACLE_BUDGET,
            fallback_factor: DEFAULT_FALLBACK_FACTOR,
            oracle_timeout_ms: DEFAULT_ORACLE_TIMEOUT,
            position_broadcast_interval_ms: DEFAULT_POSITION_BROADCAST_INTERVAL,
            photo_retention_ms: DEFAULT_PHOTO_RETENTION,
            poll_interval_ms: DEFAULT_POLL_INTERVAL,
            oracle_url: None,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let fallback_factor = if (0.0..=1.0).contains(&value.fallback_factor) {
            value.fallback_factor
        } else {
            warn!(
                fallback_factor = value.fallback_factor,
                "fallback factor outside 0..=1; using default"
            );
            DEFAULT_FALLBACK_FACTOR
        };

        Self {
            submission_cooldown: value.submission_cooldown_ms,
            oracle_budget: value.oracle_budget,
            fallback_factor,
            oracle_timeout: value.oracle_timeout_ms,
            position_broadcast_interval: value.position_broadcast_interval_ms,
            photo_retention: value.photo_retention_ms,
            poll_interval: value.poll_interval_ms,
            oracle_url: value.oracle_url.filter(|url| !url.trim().is_empty()),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.submission_cooldown, Duration::from_secs(5));
        assert_eq!(config.oracle_budget, 20);
        assert_eq!(config.fallback_factor, 0.6);
        assert_eq!(config.oracle_timeout, Duration::from_secs(8));
        assert_eq!(config.position_broadcast_interval, Duration::from_secs(10));
        assert_eq!(config.photo_retention, Duration::from_secs(2_592_000));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.oracle_url, None);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config =
            AppConfig::from_json(r#"{ "oracle_budget": 3, "submission_cooldown_ms": 250 }"#)
                .unwrap();
        assert_eq!(config.oracle_budget, 3);
        assert_eq!(config.submission_cooldown, Duration::from_millis(250));
        assert_eq!(config.oracle_timeout, Duration::from_secs(8));
    }

    #[test]
    fn out_of_range_fallback_factor_is_ignored() {
        let config = AppConfig::from_json(r#"{ "fallback_factor": 1.5 }"#).unwrap();
        assert_eq!(config.fallback_factor, 0.6);
    }

    #[test]
    fn oracle_url_override_skips_blank_values() {
        let config = AppConfig::from_json(r#"{ "oracle_url": "http://file" }"#).unwrap();
        assert_eq!(
            config.clone().with_oracle_url(Some("  ".into())).oracle_url.as_deref(),
            Some("http://file")
        );
        assert_eq!(
            config.with_oracle_url(Some("http://env".into())).oracle_url.as_deref(),
            Some("http://env")
        );
    }
}
