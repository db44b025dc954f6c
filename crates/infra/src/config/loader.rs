//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `RXFLOW_CHECKPOINT_PATH` is unset, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! `RXFLOW_CHECKPOINT_PATH` is required; everything else falls back to the
//! defaults.
//! - `RXFLOW_CHECKPOINT_PATH`: Checkpoint directory or SQLite file
//! - `RXFLOW_CHECKPOINT_BACKEND`: `json`, `sqlite` or `memory`
//! - `RXFLOW_CHECKPOINT_POOL_SIZE`: SQLite connection pool size
//! - `RXFLOW_WORKERS`: Concurrent items per batch
//! - `RXFLOW_LOG_FILTER`: Default `EnvFilter` directive
//! - `RXFLOW_LOG_FORMAT`: `pretty` or `json`
//!
//! Settings for the `default` dependency:
//! - `RXFLOW_REQUESTS_PER_MINUTE`, `RXFLOW_REQUESTS_PER_DAY`
//! - `RXFLOW_ACQUIRE_TIMEOUT_MS`, `RXFLOW_POLL_INTERVAL_MS`
//! - `RXFLOW_FAILURE_THRESHOLD`, `RXFLOW_SUCCESS_THRESHOLD`,
//!   `RXFLOW_HALF_OPEN_MAX_CALLS`, `RXFLOW_RECOVERY_TIMEOUT_MS`
//! - `RXFLOW_MAX_RETRIES`, `RXFLOW_BACKOFF_FACTOR_MS`,
//!   `RXFLOW_MAX_BACKOFF_MS`, `RXFLOW_MAX_JITTER_MS`
//! - `RXFLOW_RETRY_STATUS_CODES`: Comma-separated list, e.g. `429,503`
//! - `RXFLOW_NOT_FOUND_IS_BENIGN`: true/false
//! - `RXFLOW_ATTEMPT_TIMEOUT_MS`
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./rxflow.toml` or `./rxflow.json` (current working directory)
//! 2. `./config.toml` or `./config.json` (current working directory)
//! 3. Relative to executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use rxflow_domain::constants::DEFAULT_DEPENDENCY;
use rxflow_domain::{Config, DependencyConfig, Result, RxflowError};

const FILE_NAMES: [&str; 4] = ["rxflow.toml", "rxflow.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// Loads from environment variables when `RXFLOW_CHECKPOINT_PATH` is set;
/// any other variable with a bad value is then an error. Without it, falls
/// back to loading from a config file.
///
/// # Errors
/// Returns `RxflowError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - Values fail validation
pub fn load() -> Result<Config> {
    if std::env::var_os("RXFLOW_CHECKPOINT_PATH").is_none() {
        tracing::debug!("RXFLOW_CHECKPOINT_PATH not set, trying file");
        return load_from_file(None);
    }
    let config = load_from_env()?;
    tracing::info!("Configuration loaded from environment variables");
    Ok(config)
}

/// [`load`], using the built-in defaults when no source exists at all
///
/// A config file that exists but does not parse is still an error.
pub fn load_or_default() -> Result<Config> {
    if std::env::var_os("RXFLOW_CHECKPOINT_PATH").is_none() && probe_config_paths().is_none() {
        tracing::info!("No configuration found, using defaults");
        return Ok(Config::default());
    }
    load()
}

/// Load configuration from environment variables
///
/// # Errors
/// Returns `RxflowError::Config` if `RXFLOW_CHECKPOINT_PATH` is missing or
/// any variable has an invalid value.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();
    config.checkpoint.path = env_var("RXFLOW_CHECKPOINT_PATH")?;
    if let Some(backend) = env_parse("RXFLOW_CHECKPOINT_BACKEND")? {
        config.checkpoint.backend = backend;
    }
    if let Some(pool_size) = env_parse("RXFLOW_CHECKPOINT_POOL_SIZE")? {
        config.checkpoint.pool_size = pool_size;
    }
    if let Some(workers) = env_parse("RXFLOW_WORKERS")? {
        config.batch.workers = workers;
    }
    if let Ok(filter) = std::env::var("RXFLOW_LOG_FILTER") {
        config.logging.filter = filter;
    }
    if let Some(format) = env_parse("RXFLOW_LOG_FORMAT")? {
        config.logging.format = format;
    }

    let mut dependency = DependencyConfig::default();
    apply_dependency_env(&mut dependency)?;
    config.dependencies.insert(DEFAULT_DEPENDENCY.to_string(), dependency);

    config.validate()?;
    Ok(config)
}

fn apply_dependency_env(dep: &mut DependencyConfig) -> Result<()> {
    set_from_env(&mut dep.requests_per_minute, "RXFLOW_REQUESTS_PER_MINUTE")?;
    if let Some(per_day) = env_parse("RXFLOW_REQUESTS_PER_DAY")? {
        dep.requests_per_day = Some(per_day);
    }
    set_from_env(&mut dep.acquire_timeout_ms, "RXFLOW_ACQUIRE_TIMEOUT_MS")?;
    set_from_env(&mut dep.poll_interval_ms, "RXFLOW_POLL_INTERVAL_MS")?;
    set_from_env(&mut dep.failure_threshold, "RXFLOW_FAILURE_THRESHOLD")?;
    set_from_env(&mut dep.success_threshold, "RXFLOW_SUCCESS_THRESHOLD")?;
    set_from_env(&mut dep.half_open_max_calls, "RXFLOW_HALF_OPEN_MAX_CALLS")?;
    set_from_env(&mut dep.recovery_timeout_ms, "RXFLOW_RECOVERY_TIMEOUT_MS")?;
    set_from_env(&mut dep.max_retries, "RXFLOW_MAX_RETRIES")?;
    set_from_env(&mut dep.backoff_factor_ms, "RXFLOW_BACKOFF_FACTOR_MS")?;
    set_from_env(&mut dep.max_backoff_ms, "RXFLOW_MAX_BACKOFF_MS")?;
    set_from_env(&mut dep.max_jitter_ms, "RXFLOW_MAX_JITTER_MS")?;
    if let Ok(codes) = std::env::var("RXFLOW_RETRY_STATUS_CODES") {
        dep.retry_on_status_codes = parse_status_codes(&codes)?;
    }
    dep.not_found_is_benign = env_bool("RXFLOW_NOT_FOUND_IS_BENIGN", dep.not_found_is_benign);
    if let Some(timeout) = env_parse("RXFLOW_ATTEMPT_TIMEOUT_MS")? {
        dep.attempt_timeout_ms = Some(timeout);
    }
    Ok(())
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `RxflowError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(RxflowError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            RxflowError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| RxflowError::Config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| RxflowError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| RxflowError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(RxflowError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe multiple paths for configuration files
///
/// Searches the current working directory first, then the directory of
/// the running executable.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

/// Get required environment variable
///
/// # Errors
/// Returns `RxflowError::Config` if the variable is not set.
fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| RxflowError::Config(format!("Missing required environment variable: {key}")))
}

/// Parse an optional environment variable
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| RxflowError::Config(format!("Invalid value for {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn set_from_env<T>(target: &mut T, key: &str) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = env_parse(key)? {
        *target = value;
    }
    Ok(())
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn parse_status_codes(raw: &str) -> Result<Vec<u16>> {
    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| {
            code.parse::<u16>()
                .map_err(|e| RxflowError::Config(format!("Invalid status code {code:?}: {e}")))
        })
        .collect()
}
