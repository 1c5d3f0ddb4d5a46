//! Configuration types.
//!
//! Every struct has a `Default` carrying the documented defaults and a
//! `from_env()` constructor. Unparseable values are rejected rather than
//! silently replaced by the default.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Ingestion / poller configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Interval between poll cycles.
    pub poll_interval: Duration,
    /// Delay used instead of `poll_interval` after a cycle that hit an
    /// adapter-level failure. Does not compound.
    pub backoff_interval: Duration,
    /// Maximum messages processed concurrently within one cycle.
    pub max_workers: usize,
    /// How long shutdown waits for an in-flight cycle before abandoning it.
    pub shutdown_grace: Duration,
    /// Attachments larger than this are rejected.
    pub max_attachment_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            backoff_interval: Duration::from_secs(60),
            max_workers: 4,
            shutdown_grace: Duration::from_secs(10),
            max_attachment_bytes: 25 * 1024 * 1024,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let max_workers = env_parse("MAILFLOW_WORKERS", defaults.max_workers)?;
        if max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAILFLOW_WORKERS".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            poll_interval: Duration::from_secs(env_parse(
                "MAILFLOW_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            backoff_interval: Duration::from_secs(env_parse(
                "MAILFLOW_BACKOFF_SECS",
                defaults.backoff_interval.as_secs(),
            )?),
            max_workers,
            shutdown_grace: Duration::from_secs(env_parse(
                "MAILFLOW_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace.as_secs(),
            )?),
            max_attachment_bytes: env_parse(
                "MAILFLOW_MAX_ATTACHMENT_BYTES",
                defaults.max_attachment_bytes,
            )?,
        })
    }
}

/// Thread resolver configuration.
#[derive(Debug, Clone)]
pub struct ThreadConfig {
    /// Maximum gap between an email and a conversation's last activity
    /// for subject-based merging.
    pub merge_window: chrono::Duration,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            merge_window: chrono::Duration::hours(72),
        }
    }
}

impl ThreadConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let hours: i64 = env_parse("MAILFLOW_MERGE_WINDOW_HOURS", 72)?;
        if hours < 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAILFLOW_MERGE_WINDOW_HOURS".into(),
                message: "must not be negative".into(),
            });
        }
        Ok(Self {
            merge_window: chrono::Duration::hours(hours),
        })
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// libSQL database file backing the blob store.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/mailflow.db"),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        std::env::var("MAILFLOW_DB_PATH")
            .map(|p| Self {
                db_path: PathBuf::from(p),
            })
            .unwrap_or_default()
    }
}

/// Parse an environment variable, falling back to `default` when unset.
pub(crate) fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

/// Parse a comma-separated environment variable into a trimmed list.
pub(crate) fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
