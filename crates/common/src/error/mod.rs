//! Shared error classification for rxflow crates
//!
//! Every layer defines its own `thiserror` enum; this module only provides
//! the vocabulary those enums use to describe themselves:
//!
//! 1. **`ErrorClassification` trait**: retryability, severity, criticality and
//!    an optional retry delay hint
//! 2. **`ErrorSeverity` enum**: a unified severity level for logging decisions
//! 3. **`ConfigError`**: rejected configuration values from the validating
//!    builders in `resilience`
//!
//! ## ErrorSeverity Levels
//!
//! | Level | Use Case | Examples |
//! |-------|----------|----------|
//! | **Info** | Expected conditions | Resource not found, cancelled run |
//! | **Warning** | Degraded but operational | Rate limiting, open breaker, timeouts |
//! | **Error** | Failure requiring attention | Rejected request, server failure |
//! | **Critical** | System integrity at risk | Corrupt checkpoint, internal bug |
//!
//! ## Using ErrorClassification for retry logic
//!
//! ```rust,ignore
//! use rxflow_common::error::ErrorClassification;
//!
//! match transport.execute(op).await {
//!     Err(e) if e.is_retryable() => schedule_again(e.retry_after()),
//!     Err(e) => report(e.severity(), e),
//!     Ok(v) => v,
//! }
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error classification trait for consistent error handling across crates
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient: timeouts, throttling, open breakers
    /// and temporary server unavailability.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Get the suggested retry delay if applicable
    ///
    /// Returns `Some(Duration)` when a specific delay is known (for example
    /// from a `Retry-After` header or an open breaker's recovery window).
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Configuration errors raised by validating builders
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field holds a value outside its accepted range
    #[error("invalid configuration for '{field}': {message}")]
    Invalid {
        /// Name of the offending field
        field: &'static str,
        /// Human-readable constraint that was violated
        message: String,
    },
}

impl ConfigError {
    /// Build an [`ConfigError::Invalid`] for `field`.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { field, message: message.into() }
    }

    /// Name of the field that failed validation.
    #[must_use]
    pub fn field(&self) -> &'static str {
        match self {
            Self::Invalid { field, .. } => field,
        }
    }
}

impl ErrorClassification for ConfigError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Error
    }
}

/// Result alias for configuration validation
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates `ConfigError::invalid` formatting and classification.
    ///
    /// Assertions:
    /// - Confirms the message names the field.
    /// - Ensures configuration errors are never retryable.
    #[test]
    fn test_config_error_display_and_classification() {
        let err = ConfigError::invalid("requests_per_minute", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "invalid configuration for 'requests_per_minute': must be greater than zero"
        );
        assert_eq!(err.field(), "requests_per_minute");
        assert!(!err.is_retryable());
        assert!(!err.is_critical());
        assert_eq!(err.severity(), ErrorSeverity::Error);
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_severity_ordering_and_display() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARN");
        assert_eq!(ErrorSeverity::Critical.to_string(), "CRITICAL");
    }
}
