//! Configuration loading for fleetsync.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `FLEETSYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const ENV_PREFIX: &str = "FLEETSYNC_";

/// Rows per page of a paginated list.
pub const DEFAULT_PAGE_SIZE: usize = 15;

/// Application configuration derived from `FLEETSYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Base URL of the management API; list paths resolve under `/api/v1/`.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub poll: PollConfig,
}

/// Sizing and timing of list polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PollConfig {
    /// Environment variable: `FLEETSYNC_PAGE_SIZE`
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Upper bound on events fetched per request.
    ///
    /// Environment variable: `FLEETSYNC_EVENT_PAGE_SIZE`
    #[serde(default = "default_event_page_size")]
    pub event_page_size: usize,
    /// Environment variable: `FLEETSYNC_POLL_INTERVAL_MS`
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Quiet period before an edited query is fetched.
    ///
    /// Environment variable: `FLEETSYNC_SETTLE_WINDOW_MS`
    #[serde(default = "default_settle_window_ms")]
    pub settle_window_ms: u64,
    #[serde(default = "default_device_events_interval_ms")]
    pub device_events_interval_ms: u64,
    #[serde(default = "default_fleet_events_interval_ms")]
    pub fleet_events_interval_ms: u64,
    #[serde(default = "default_default_events_interval_ms")]
    pub default_events_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            api_base_url: default_api_base_url(),
            poll: PollConfig::default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            event_page_size: default_event_page_size(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_window_ms: default_settle_window_ms(),
            device_events_interval_ms: default_device_events_interval_ms(),
            fleet_events_interval_ms: default_fleet_events_interval_ms(),
            default_events_interval_ms: default_default_events_interval_ms(),
        }
    }
}

impl AppConfig {
    /// Parsed form of [`AppConfig::api_base_url`].
    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.api_base_url).map_err(|source| ConfigError::InvalidApiBaseUrl {
            value: self.api_base_url.clone(),
            source,
        })
    }

    /// Returns a redacted JSON representation (URL credentials are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if let Ok(mut url) = Url::parse(&config.api_base_url)
            && url.password().is_some()
        {
            if url.set_password(Some("REDACTED")).is_ok() {
                config.api_base_url = url.to_string();
            }
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        self.api_base_url()?;
        self.poll.validate()
    }
}

impl PollConfig {
    /// Validate polling bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=1000).contains(&self.page_size) {
            return Err(ConfigError::InvalidPageSize {
                field: "page size",
                value: self.page_size,
            });
        }
        if !(1..=1000).contains(&self.event_page_size) {
            return Err(ConfigError::InvalidPageSize {
                field: "event page size",
                value: self.event_page_size,
            });
        }

        for (field, value) in [
            ("poll interval", self.poll_interval_ms),
            ("device events interval", self.device_events_interval_ms),
            ("fleet events interval", self.fleet_events_interval_ms),
            ("default events interval", self.default_events_interval_ms),
        ] {
            if value < 1_000 {
                return Err(ConfigError::IntervalTooShort { field, value });
            }
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_api_base_url() -> String {
    "http://localhost:3443/api/flightctl".to_string()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_event_page_size() -> usize {
    200
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_settle_window_ms() -> u64 {
    1_000
}

fn default_device_events_interval_ms() -> u64 {
    180_000
}

fn default_fleet_events_interval_ms() -> u64 {
    300_000
}

fn default_default_events_interval_ms() -> u64 {
    600_000
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api base url '{value}': {source}")]
    InvalidApiBaseUrl {
        value: String,
        source: url::ParseError,
    },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("invalid value '{value}' for {key}")]
    InvalidNumber { key: String, value: String },
    #[error("{field} must be between 1 and 1000, got {value}")]
    InvalidPageSize { field: &'static str, value: usize },
    #[error("{field} must be at least 1000 ms, got {value}")]
    IntervalTooShort { field: &'static str, value: u64 },
}

/// Loads configuration using layered `.env` files and `FLEETSYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates the configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Process environment wins over every file.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let api_base_url = layered
            .remove("API_BASE_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_api_base_url);

        let poll = PollConfig {
            page_size: parse_number(&mut layered, "PAGE_SIZE")?
                .unwrap_or_else(default_page_size),
            event_page_size: parse_number(&mut layered, "EVENT_PAGE_SIZE")?
                .unwrap_or_else(default_event_page_size),
            poll_interval_ms: parse_number(&mut layered, "POLL_INTERVAL_MS")?
                .unwrap_or_else(default_poll_interval_ms),
            settle_window_ms: parse_number(&mut layered, "SETTLE_WINDOW_MS")?
                .unwrap_or_else(default_settle_window_ms),
            device_events_interval_ms: parse_number(&mut layered, "DEVICE_EVENTS_INTERVAL_MS")?
                .unwrap_or_else(default_device_events_interval_ms),
            fleet_events_interval_ms: parse_number(&mut layered, "FLEET_EVENTS_INTERVAL_MS")?
                .unwrap_or_else(default_fleet_events_interval_ms),
            default_events_interval_ms: parse_number(&mut layered, "DEFAULT_EVENTS_INTERVAL_MS")?
                .unwrap_or_else(default_default_events_interval_ms),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            api_base_url,
            poll,
        };
        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(self.base_dir.join(format!(".env.{profile}")), &mut values)?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{profile}.local")),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number<N: std::str::FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<N>, ConfigError> {
    let Some(raw) = layered.remove(key).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidNumber {
            key: format!("{ENV_PREFIX}{key}"),
            value: raw,
        })
}
