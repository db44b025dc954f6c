//! Configuration management
//!
//! Durations are stored as milliseconds so the same structures read
//! naturally from JSON, TOML and environment variables.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ACQUIRE_TIMEOUT_MS, DEFAULT_BACKOFF_FACTOR_MS, DEFAULT_CHECKPOINT_DIR,
    DEFAULT_DEPENDENCY, DEFAULT_FAILURE_THRESHOLD, DEFAULT_HALF_OPEN_MAX_CALLS, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_BACKOFF_MS, DEFAULT_MAX_JITTER_MS, DEFAULT_MAX_RETRIES, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_RECOVERY_TIMEOUT_MS, DEFAULT_REQUESTS_PER_MINUTE, DEFAULT_RETRY_STATUS_CODES,
    DEFAULT_SQLITE_POOL_SIZE, DEFAULT_SUCCESS_THRESHOLD, DEFAULT_WORKERS, MAX_WORKERS,
};
use crate::errors::{Result, RxflowError};

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// One entry per outbound dependency, keyed by name
    pub dependencies: BTreeMap<String, DependencyConfig>,
    pub checkpoint: CheckpointConfig,
    pub batch: BatchSettings,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        let mut dependencies = BTreeMap::new();
        dependencies.insert(DEFAULT_DEPENDENCY.to_string(), DependencyConfig::default());
        Self {
            dependencies,
            checkpoint: CheckpointConfig::default(),
            batch: BatchSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Settings for `name`, if configured
    pub fn dependency(&self, name: &str) -> Option<&DependencyConfig> {
        self.dependencies.get(name)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.dependencies.is_empty() {
            return Err(RxflowError::Config("at least one dependency must be configured".into()));
        }
        if let Some(name) = self.dependencies.keys().find(|name| name.trim().is_empty()) {
            return Err(RxflowError::Config(format!("invalid dependency name: {name:?}")));
        }
        if !(1..=MAX_WORKERS).contains(&self.batch.workers) {
            return Err(RxflowError::Config(format!(
                "batch.workers must be between 1 and {MAX_WORKERS}, got {}",
                self.batch.workers
            )));
        }
        if self.checkpoint.backend == CheckpointBackend::Sqlite && self.checkpoint.pool_size == 0 {
            return Err(RxflowError::Config("checkpoint.pool_size must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Admission, breaker and retry settings for one dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    pub requests_per_minute: u32,
    pub requests_per_day: Option<u32>,
    pub acquire_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Probes allowed in flight while the breaker is half-open
    pub half_open_max_calls: u32,
    pub recovery_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_factor_ms: u64,
    pub max_backoff_ms: u64,
    pub max_jitter_ms: u64,
    pub retry_on_status_codes: Vec<u16>,
    pub not_found_is_benign: bool,
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            requests_per_day: None,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
            recovery_timeout_ms: DEFAULT_RECOVERY_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_factor_ms: DEFAULT_BACKOFF_FACTOR_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            max_jitter_ms: DEFAULT_MAX_JITTER_MS,
            retry_on_status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            not_found_is_benign: true,
            attempt_timeout_ms: None,
        }
    }
}

impl DependencyConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn backoff_factor(&self) -> Duration {
        Duration::from_millis(self.backoff_factor_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}

/// Where checkpoints are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// One JSON file per batch in `path` (a directory)
    Json,
    /// One row per batch in the SQLite database at `path`
    Sqlite,
    /// Process memory only; nothing survives a restart
    Memory,
}

crate::impl_domain_status_conversions!(CheckpointBackend {
    Json => "json",
    Sqlite => "sqlite",
    Memory => "memory",
});

/// Checkpoint storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub backend: CheckpointBackend,
    pub path: String,
    /// Connection pool size for the SQLite backend
    pub pool_size: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::Json,
            path: DEFAULT_CHECKPOINT_DIR.to_string(),
            pool_size: DEFAULT_SQLITE_POOL_SIZE,
        }
    }
}

/// Batch run settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Concurrent items; 1 runs the sequential coordinator
    pub workers: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self { workers: DEFAULT_WORKERS }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

crate::impl_domain_status_conversions!(LogFormat {
    Pretty => "pretty",
    Json => "json",
});

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: DEFAULT_LOG_FILTER.to_string(), format: LogFormat::Pretty }
    }
}
