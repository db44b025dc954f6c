//! Domain-free building blocks shared across rxflow crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error classification and configuration errors
//! - `runtime`: async resilience primitives (clock, rate limiter, circuit
//!   breaker, backoff, resilient transport)
//! - `observability`: tracing spans and events (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{ConfigError, ConfigResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{
    Admission, BackoffPolicy, CallError, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerMetrics, CircuitState, Clock, FailureKind, MockClock, RateLimiter,
    RateLimiterConfig, RateLimiterStatus, ResilientTransport, SystemClock, TransportConfig,
    TransportStats,
};
