//! Resilience primitives for governing outbound calls
//!
//! This module provides **generic, domain-free** building blocks:
//! - **Rate Limiter**: sliding 60 second window with an optional daily cap
//! - **Circuit Breaker**: Closed / Open / HalfOpen failure isolation
//! - **Backoff**: exponential delays with random jitter
//! - **Resilient Transport**: composes the three around one dependency,
//!   classifying outcomes and keeping breaker accounting honest
//!
//! Everything time-dependent goes through [`Clock`]. Production code uses
//! [`SystemClock`]; tests use [`MockClock`] (manual time) or [`TokioClock`]
//! (paused tokio runtime) so no test has to wait in real time.
//!
//! ## Typical wiring
//!
//! ```rust,ignore
//! use rxflow_common::resilience::{
//!     CallError, CircuitBreakerConfig, RateLimiterConfig, ResilientTransport, TransportConfig,
//! };
//!
//! let transport = ResilientTransport::new(
//!     "drug-label-api",
//!     TransportConfig::default(),
//!     RateLimiterConfig::builder().requests_per_minute(40).build()?,
//!     CircuitBreakerConfig::default(),
//! )?;
//!
//! let body = transport.execute(|| client.get_json(&url)).await?;
//! ```
//!
//! Share one transport per dependency (behind an `Arc`) so every caller
//! counts against the same window and breaker.

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod rate_limiter;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilderWithClock, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitBreakerMetrics, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock, TokioClock};
pub use rate_limiter::{
    next_utc_midnight, Admission, RateLimiter, RateLimiterConfig, RateLimiterConfigBuilder,
    RateLimiterStatus,
};
pub use transport::{
    CallError, FailureKind, ResilientTransport, TransportConfig, TransportConfigBuilder,
    TransportStats, Verdict, DEFAULT_RETRY_STATUS_CODES,
};
