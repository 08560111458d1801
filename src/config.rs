//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Page-side capture timing.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Quiet period after the last mutation before a capture runs.
    pub debounce: Duration,
    /// Safety timer period; captures even when no mutation was observed.
    pub safety_interval: Duration,
    /// Delay of the one-off capture scheduled when the observer arms
    /// (`None` disables it).
    pub initial_capture_delay: Option<Duration>,
    /// How long the page waits for the background before assuming context loss.
    pub response_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            safety_interval: Duration::from_secs(30),
            initial_capture_delay: Some(Duration::from_secs(1)),
            response_timeout: Duration::from_secs(5),
        }
    }
}

impl CaptureConfig {
    /// Build from `CHAT_NEST_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            debounce: env_millis("CHAT_NEST_DEBOUNCE_MS")?.unwrap_or(defaults.debounce),
            safety_interval: env_millis("CHAT_NEST_SAFETY_INTERVAL_MS")?
                .unwrap_or(defaults.safety_interval),
            initial_capture_delay: match env_millis("CHAT_NEST_INITIAL_CAPTURE_MS")? {
                Some(d) if d.is_zero() => None,
                Some(d) => Some(d),
                None => defaults.initial_capture_delay,
            },
            response_timeout: env_millis("CHAT_NEST_RESPONSE_TIMEOUT_MS")?
                .unwrap_or(defaults.response_timeout),
        })
    }
}

/// Storage layout and limits.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// libSQL database file holding the content store and both key-value namespaces.
    pub db_path: PathBuf,
    /// Maximum number of metadata index entries (`N_max`).
    pub max_index_entries: usize,
    /// Per-item byte quota of the index (sync) store.
    pub index_item_quota: usize,
    /// Total byte quota of the index (sync) store.
    pub index_total_quota: usize,
    /// Key prefix of fallback records in the local namespace.
    pub fallback_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/chat-nest.db"),
            max_index_entries: 100,
            index_item_quota: 65_536,
            index_total_quota: 102_400,
            fallback_prefix: "chatnest_temp_".to_string(),
        }
    }
}

impl StorageConfig {
    /// Build from `CHAT_NEST_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            db_path: std::env::var("CHAT_NEST_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            max_index_entries: env_parse("CHAT_NEST_MAX_INDEX_ENTRIES")?
                .unwrap_or(defaults.max_index_entries),
            index_item_quota: env_parse("CHAT_NEST_INDEX_ITEM_QUOTA")?
                .unwrap_or(defaults.index_item_quota),
            index_total_quota: env_parse("CHAT_NEST_INDEX_TOTAL_QUOTA")?
                .unwrap_or(defaults.index_total_quota),
            fallback_prefix: defaults.fallback_prefix,
        })
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn env_millis(key: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}
