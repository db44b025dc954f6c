//! Domain constants
//!
//! Defaults shared by the configuration structures, the loader and the CLI.

// Rate limiting
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

// Circuit breaker
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
pub const DEFAULT_HALF_OPEN_MAX_CALLS: u32 = 3;
pub const DEFAULT_RECOVERY_TIMEOUT_MS: u64 = 60_000;

// Retries
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_FACTOR_MS: u64 = 1_000;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;
pub const DEFAULT_MAX_JITTER_MS: u64 = 500;
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

// Checkpoints
pub const DEFAULT_CHECKPOINT_DIR: &str = "checkpoints";
pub const DEFAULT_SQLITE_POOL_SIZE: u32 = 4;
pub const MAX_BATCH_ID_LENGTH: usize = 128;

// Batch runs
pub const DEFAULT_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 64;
pub const DEFAULT_DEPENDENCY: &str = "default";

// Logging
pub const DEFAULT_LOG_FILTER: &str = "info";
