//! Runtime configuration read from `POS_SYNC_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::{normalize_server_url, ConnectionString, DEFAULT_TIMEOUT};
use crate::error::ConfigError;
use crate::network::DEFAULT_DEBOUNCE;
use crate::retry::RetryPolicy;
use crate::scheduler::{SchedulerOptions, DEFAULT_PROBE_INTERVAL, DEFAULT_SYNC_INTERVAL};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub server_url: String,
    pub api_key: Option<String>,
    pub terminal_id: Option<String>,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_json: bool,
    pub sync_interval: Duration,
    /// `None` when the probe is switched off (`POS_SYNC_PROBE_INTERVAL_SECS=0`).
    pub probe_interval: Option<Duration>,
    pub debounce: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl SyncConfig {
    /// Explicit variables win over fields carried by `POS_SYNC_CONNECTION`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let connection = match env_nonempty("POS_SYNC_CONNECTION") {
            Some(raw) => ConnectionString::parse(&raw).ok_or(ConfigError::Invalid {
                key: "POS_SYNC_CONNECTION",
                value: "<unreadable connection string>".to_string(),
            })?,
            None => ConnectionString::default(),
        };

        let server_url = env_nonempty("POS_SYNC_URL")
            .map(|u| normalize_server_url(&u))
            .or(connection.url)
            .ok_or(ConfigError::Missing("POS_SYNC_URL"))?;
        let api_key = env_nonempty("POS_SYNC_API_KEY").or(connection.api_key);
        let terminal_id = env_nonempty("POS_SYNC_TERMINAL_ID").or(connection.terminal_id);

        let data_dir = env_nonempty("POS_SYNC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let log_dir = env_nonempty("POS_SYNC_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("logs"));
        let log_json = env_bool("POS_SYNC_LOG_JSON").unwrap_or(false);

        let sync_interval = env_parse::<u64>("POS_SYNC_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SYNC_INTERVAL);
        if sync_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "POS_SYNC_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }
        let probe_interval = match env_parse::<u64>("POS_SYNC_PROBE_INTERVAL_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_PROBE_INTERVAL),
        };
        let debounce = env_parse::<u64>("POS_SYNC_DEBOUNCE_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_DEBOUNCE);
        let request_timeout = env_parse::<u64>("POS_SYNC_REQUEST_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            base_delay_ms: env_parse("POS_SYNC_RETRY_BASE_MS")?.unwrap_or(defaults.base_delay_ms),
            max_delay_ms: env_parse("POS_SYNC_RETRY_MAX_MS")?.unwrap_or(defaults.max_delay_ms),
            max_attempts: env_parse("POS_SYNC_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
        };

        Ok(Self {
            server_url,
            api_key,
            terminal_id,
            data_dir,
            log_dir,
            log_json,
            sync_interval,
            probe_interval,
            debounce,
            request_timeout,
            retry,
        })
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            sync_interval: self.sync_interval,
            probe_interval: self.probe_interval,
        }
    }
}

fn default_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                .join(".local")
                .join("share")
        });
    base.join("pos-offline-sync")
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_bool(key: &'static str) -> Option<bool> {
    env_nonempty(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_parse<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    env_nonempty(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| ConfigError::Invalid { key, value: raw })
        })
        .transpose()
}
