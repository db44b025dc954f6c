//! Circuit breaker for isolating a failing dependency
//!
//! The breaker starts **Closed** and counts consecutive failures. Reaching
//! `failure_threshold` opens it; while **Open** every request is rejected
//! without reaching the dependency. Once `recovery_timeout` has elapsed since
//! the last failure, the next admission check moves it to **HalfOpen**, where
//! at most `half_open_max_calls` probes may be in flight at once:
//! `success_threshold` consecutive successes close it again, a single failure
//! re-opens it. A probe that ends without a verdict (not found, cancelled,
//! retried) hands its slot back through [`CircuitBreaker::release`].
//!
//! The Open → HalfOpen transition is lazy. It happens inside
//! [`CircuitBreaker::allow_request`] and [`CircuitBreaker::state`]; no timer
//! runs in the background.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, letting probes through to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes needed to close the circuit
    pub success_threshold: u32,
    /// Time to wait after the last failure before probing
    pub recovery_timeout: Duration,
    /// Probes allowed in flight at once while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold", "must be greater than 0"));
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::invalid("half_open_max_calls", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the consecutive failures that open the circuit
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the consecutive half-open successes that close the circuit
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open after the last failure
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Set how many probes may be in flight while half-open
    pub fn half_open_max_calls(mut self, calls: u32) -> Self {
        self.config.half_open_max_calls = calls;
        self
    }

    /// Set a custom clock for the circuit breaker (useful for testing)
    pub fn clock<C: Clock>(self, clock: C) -> CircuitBreakerBuilderWithClock<C> {
        CircuitBreakerBuilderWithClock { config: self.config, clock }
    }

    /// Validate and return the configuration
    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder with custom clock that builds a CircuitBreaker directly
pub struct CircuitBreakerBuilderWithClock<C: Clock> {
    config: CircuitBreakerConfig,
    clock: C,
}

impl<C: Clock> CircuitBreakerBuilderWithClock<C> {
    /// Set the consecutive failures that open the circuit
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the consecutive half-open successes that close the circuit
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open after the last failure
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Set how many probes may be in flight while half-open
    pub fn half_open_max_calls(mut self, calls: u32) -> Self {
        self.config.half_open_max_calls = calls;
        self
    }

    /// Validate the configuration and build a breaker on the chosen clock
    pub fn build(self, name: impl Into<String>) -> ConfigResult<CircuitBreaker<C>> {
        CircuitBreaker::with_clock(name, self.config, self.clock)
    }
}

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    /// Consecutive failures (Closed) or the failure that opened the circuit
    pub failure_count: u32,
    /// Consecutive successes while HalfOpen
    pub success_count: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub rejected_calls: u64,
    pub last_failure_time: Option<Instant>,
    pub state_change_time: Instant,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    total_failures: u64,
    total_successes: u64,
    rejected_calls: u64,
    last_failure_time: Option<Instant>,
    state_change_time: Instant,
    half_open_in_flight: u32,
}

/// Generic circuit breaker implementation
///
/// Counters and state live behind a single lock, so concurrent callers see
/// every transition exactly once.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("success_count", &inner.success_count)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker on the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }

    /// Create a circuit breaker using the builder pattern
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        Self::with_shared_clock(name, config, Arc::new(clock))
    }

    /// Create a circuit breaker sharing an existing clock handle
    pub fn with_shared_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<C>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let inner = BreakerState {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_failures: 0,
            total_successes: 0,
            rejected_calls: 0,
            last_failure_time: None,
            state_change_time: clock.now(),
            half_open_in_flight: 0,
        };
        Ok(Self { name: name.into(), config, inner: Mutex::new(inner), clock })
    }

    /// Name used in log lines and stats
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration this breaker was built with
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether a request may go through.
    ///
    /// Closed admits. Open rejects until `recovery_timeout` has passed since
    /// the last failure, at which point the breaker moves to HalfOpen. HalfOpen
    /// admits the caller as a probe while fewer than `half_open_max_calls`
    /// probes are in flight; every admitted probe must end in
    /// [`record_success`](Self::record_success),
    /// [`record_failure`](Self::record_failure) or [`release`](Self::release).
    pub fn allow_request(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner, now);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen if inner.half_open_in_flight < self.config.half_open_max_calls => {
                inner.half_open_in_flight += 1;
                true
            }
            CircuitState::HalfOpen => {
                inner.rejected_calls += 1;
                debug!(breaker = %self.name, "probe limit reached, rejecting call");
                false
            }
            CircuitState::Open => {
                inner.rejected_calls += 1;
                debug!(breaker = %self.name, "circuit breaker rejecting call");
                false
            }
        }
    }

    /// Hand back an admitted slot whose call ended without a verdict
    ///
    /// Only matters while HalfOpen, where it frees a probe slot.
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.total_successes += 1;

        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    let successes = inner.success_count;
                    transition(&mut inner, CircuitState::Closed, now);
                    info!(breaker = %self.name, successes, "circuit breaker closed");
                }
            }
            CircuitState::Open => {
                // late result from a call admitted before the circuit opened
                debug!(breaker = %self.name, "success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.last_failure_time = Some(now);

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    let failures = inner.failure_count;
                    transition(&mut inner, CircuitState::Open, now);
                    inner.failure_count = failures;
                    warn!(breaker = %self.name, failures, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                transition(&mut inner, CircuitState::Open, now);
                inner.failure_count = 1;
                warn!(breaker = %self.name, "circuit breaker re-opened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    /// Get the current state, applying a due Open → HalfOpen transition
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner, now);
        inner.state
    }

    /// Time left before an Open breaker starts probing; `None` otherwise
    pub fn retry_after(&self) -> Option<Duration> {
        let now = self.clock.now();
        let inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return None;
        }
        let since = inner.last_failure_time.unwrap_or(inner.state_change_time);
        Some(self.config.recovery_timeout.saturating_sub(now.saturating_duration_since(since)))
    }

    /// Get circuit breaker metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner, now);
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            rejected_calls: inner.rejected_calls,
            last_failure_time: inner.last_failure_time,
            state_change_time: inner.state_change_time,
        }
    }

    /// Force the breaker back to Closed with cleared counters
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        transition(&mut inner, CircuitState::Closed, now);
        inner.last_failure_time = None;
        info!(breaker = %self.name, "circuit breaker reset");
    }

    fn maybe_half_open(&self, inner: &mut BreakerState, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let since = inner.last_failure_time.unwrap_or(inner.state_change_time);
        if now.saturating_duration_since(since) >= self.config.recovery_timeout {
            transition(inner, CircuitState::HalfOpen, now);
            info!(breaker = %self.name, "circuit breaker half-open, probing");
        }
    }
}

fn transition(inner: &mut BreakerState, to: CircuitState, now: Instant) {
    inner.state = to;
    inner.failure_count = 0;
    inner.success_count = 0;
    inner.state_change_time = now;
    inner.half_open_in_flight = 0;
}
