//! Resilient transport: admission, bounded retries and breaker bookkeeping
//!
//! [`ResilientTransport`] wraps one outbound dependency. Every attempt goes
//! through the same gate:
//!
//! 1. the [`CircuitBreaker`] must allow the request (no rate slot is spent
//!    otherwise);
//! 2. the [`RateLimiter`] must grant a slot within its `acquire_timeout`;
//! 3. the operation runs, optionally bounded by `attempt_timeout`.
//!
//! The outcome is then classified. Transient failures are retried after an
//! exponential backoff with jitter, up to `max_retries` times, each retry
//! going through the gate again. Only the *final* outcome of a call is
//! reported to the breaker, and never when it is a not-found result, an
//! admission denial or a cancellation.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::backoff::BackoffPolicy;
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics};
use super::clock::{Clock, SystemClock};
use super::rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterStatus};
use crate::error::{ConfigError, ConfigResult, ErrorClassification, ErrorSeverity};

/// HTTP status meaning the resource does not exist
pub const NOT_FOUND: u16 = 404;

/// Status codes retried by default
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Error returned by a single attempt of an operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The dependency answered with a non-success status
    #[error("status {code}: {message}")]
    Status {
        code: u16,
        /// Server-supplied retry delay, if any
        retry_after: Option<Duration>,
        message: String,
    },

    /// The attempt did not complete in time
    #[error("timed out: {0}")]
    Timeout(String),

    /// The dependency could not be reached
    #[error("connection failed: {0}")]
    Connection(String),

    /// The attempt failed in a way that retrying cannot fix
    #[error("{0}")]
    Fatal(String),
}

impl CallError {
    /// Shorthand for a status error without a retry hint
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status { code, retry_after: None, message: message.into() }
    }

    /// Status code, if the dependency answered at all
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Server-supplied retry hint
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Final outcome of a failed [`ResilientTransport`] call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureKind {
    /// The circuit breaker rejected the call before it was attempted
    #[error("circuit breaker '{dependency}' is open")]
    CircuitOpen { dependency: String, retry_after: Option<Duration> },

    /// No rate-limit slot was granted within the acquire timeout
    #[error("rate limiter for '{dependency}' timed out waiting for a slot")]
    RateLimitTimeout { dependency: String },

    /// Every attempt timed out
    #[error("timed out after {attempts} attempt(s): {message}")]
    Timeout { attempts: u32, message: String },

    /// Rejected request, not retried
    #[error("client error{}: {message}", status_suffix(.status))]
    ClientError { status: Option<u16>, message: String },

    /// Transient dependency failure that outlasted the retry budget
    #[error("server error{} after {attempts} attempt(s): {message}", status_suffix(.status))]
    ServerError {
        status: Option<u16>,
        attempts: u32,
        message: String,
        retry_after: Option<Duration>,
    },

    /// The requested resource does not exist
    #[error("not found: {message}")]
    NotFound { message: String },

    /// The caller cancelled the call
    #[error("cancelled")]
    Cancelled,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" (status {code})")).unwrap_or_default()
}

impl FailureKind {
    /// The call was never attempted
    pub fn is_admission_denied(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::RateLimitTimeout { .. })
    }

    /// Whether this outcome was recorded as a breaker failure
    pub fn counts_against_breaker(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ClientError { .. } | Self::ServerError { .. })
    }

    /// Whether this outcome means the resource is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl ErrorClassification for FailureKind {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. }
                | Self::RateLimitTimeout { .. }
                | Self::Timeout { .. }
                | Self::ServerError { .. }
        )
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound { .. } | Self::Cancelled => ErrorSeverity::Info,
            Self::CircuitOpen { .. } | Self::RateLimitTimeout { .. } | Self::Timeout { .. } => {
                ErrorSeverity::Warning
            }
            Self::ClientError { .. } | Self::ServerError { .. } => ErrorSeverity::Error,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } | Self::ServerError { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }
}

/// How an attempt's error is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retryable,
    Permanent,
    NotFound,
}

/// Retry and classification settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    /// Statuses treated as transient
    pub retry_on_status_codes: BTreeSet<u16>,
    /// Treat 404 as an expected absence rather than a failure
    pub not_found_is_benign: bool,
    /// Upper bound for a single attempt (`None` = unbounded)
    pub attempt_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffPolicy::default(),
            retry_on_status_codes: DEFAULT_RETRY_STATUS_CODES.into_iter().collect(),
            not_found_is_benign: true,
            attempt_timeout: None,
        }
    }
}

impl TransportConfig {
    /// Create a configuration builder
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        self.backoff.validate()?;
        if self.attempt_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::invalid("attempt_timeout", "must be greater than zero"));
        }
        if let Some(code) = self.retry_on_status_codes.iter().find(|c| !(100..=599).contains(*c)) {
            return Err(ConfigError::invalid(
                "retry_on_status_codes",
                format!("{code} is not an HTTP status code"),
            ));
        }
        Ok(())
    }

    /// Classify an attempt's error
    pub fn classify(&self, error: &CallError) -> Verdict {
        match error {
            CallError::Status { code, .. } if *code == NOT_FOUND && self.not_found_is_benign => {
                Verdict::NotFound
            }
            CallError::Status { code, .. } if self.retry_on_status_codes.contains(code) => {
                Verdict::Retryable
            }
            CallError::Status { .. } | CallError::Fatal(_) => Verdict::Permanent,
            CallError::Timeout(_) | CallError::Connection(_) => Verdict::Retryable,
        }
    }
}

/// Builder for TransportConfig
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Set the retries allowed after the first attempt
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the delay policy between retries
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Replace the HTTP statuses treated as transient
    pub fn retry_on_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.config.retry_on_status_codes = codes.into_iter().collect();
        self
    }

    /// Whether 404 is reported as `NotFound` instead of a permanent failure
    pub fn not_found_is_benign(mut self, benign: bool) -> Self {
        self.config.not_found_is_benign = benign;
        self
    }

    /// Bound each attempt; `None` lets attempts run unbounded
    pub fn attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.attempt_timeout = timeout;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> ConfigResult<TransportConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Snapshot of a transport's breaker and limiter
#[derive(Debug, Clone)]
pub struct TransportStats {
    pub name: String,
    pub breaker: CircuitBreakerMetrics,
    pub limiter: RateLimiterStatus,
}

impl fmt::Display for TransportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: breaker {} ({} failures, {} rejected), {}",
            self.name,
            self.breaker.state,
            self.breaker.total_failures,
            self.breaker.rejected_calls,
            self.limiter
        )
    }
}

/// Outbound call wrapper for one dependency
pub struct ResilientTransport<C: Clock = SystemClock> {
    name: String,
    config: TransportConfig,
    limiter: Arc<RateLimiter<C>>,
    breaker: Arc<CircuitBreaker<C>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for ResilientTransport<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientTransport")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("breaker", &self.breaker.state())
            .field("limiter", &self.limiter.status())
            .finish()
    }
}

impl ResilientTransport<SystemClock> {
    /// Build a transport with its own limiter and breaker on the system clock
    pub fn new(
        name: impl Into<String>,
        config: TransportConfig,
        limiter: RateLimiterConfig,
        breaker: CircuitBreakerConfig,
    ) -> ConfigResult<Self> {
        Self::with_clock(name, config, limiter, breaker, SystemClock)
    }
}

impl<C: Clock> ResilientTransport<C> {
    /// Build a transport whose limiter, breaker and sleeps share `clock`
    pub fn with_clock(
        name: impl Into<String>,
        config: TransportConfig,
        limiter: RateLimiterConfig,
        breaker: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        let name = name.into();
        let clock = Arc::new(clock);
        let limiter = Arc::new(RateLimiter::with_shared_clock(limiter, Arc::clone(&clock))?);
        let breaker =
            Arc::new(CircuitBreaker::with_shared_clock(name.clone(), breaker, Arc::clone(&clock))?);
        Self::from_parts(name, config, limiter, breaker)
    }

    /// Assemble a transport from an existing limiter and breaker
    ///
    /// The limiter's clock drives backoff sleeps.
    pub fn from_parts(
        name: impl Into<String>,
        config: TransportConfig,
        limiter: Arc<RateLimiter<C>>,
        breaker: Arc<CircuitBreaker<C>>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let clock = Arc::clone(limiter.clock());
        Ok(Self { name: name.into(), config, limiter, breaker, clock })
    }

    /// Dependency name used in logs and failures
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Retry and classification settings
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Rate limiter gating every attempt
    pub fn limiter(&self) -> &Arc<RateLimiter<C>> {
        &self.limiter
    }

    /// Circuit breaker guarding the dependency
    pub fn breaker(&self) -> &Arc<CircuitBreaker<C>> {
        &self.breaker
    }

    /// Breaker and limiter snapshot
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            name: self.name.clone(),
            breaker: self.breaker.metrics(),
            limiter: self.limiter.status(),
        }
    }

    /// Run `operation` through admission, retries and breaker bookkeeping
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, FailureKind>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.execute_cancellable(operation, &CancellationToken::new()).await
    }

    /// [`execute`](Self::execute) that gives up with
    /// [`FailureKind::Cancelled`] once `cancel` fires.
    ///
    /// Cancellation is observed before each attempt, while waiting for a
    /// rate-limit slot and during backoff sleeps. An attempt already in
    /// flight runs to completion.
    #[instrument(skip_all, fields(transport = %self.name))]
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        mut operation: F,
        cancel: &CancellationToken,
    ) -> Result<T, FailureKind>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            self.admit(cancel).await?;
            debug!(attempt, "calling dependency");

            let error = match self.run_attempt(&mut operation).await {
                Ok(value) => {
                    self.breaker.record_success();
                    if attempt > 0 {
                        info!(attempts = attempt + 1, "call succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            match self.config.classify(&error) {
                Verdict::NotFound => {
                    self.breaker.release();
                    debug!(%error, "dependency reported not found");
                    return Err(FailureKind::NotFound { message: error.to_string() });
                }
                Verdict::Permanent => {
                    self.breaker.record_failure();
                    warn!(%error, "permanent failure, not retrying");
                    return Err(permanent_failure(error));
                }
                Verdict::Retryable if attempt >= self.config.max_retries => {
                    self.breaker.record_failure();
                    warn!(%error, attempts = attempt + 1, "retries exhausted");
                    return Err(exhausted_failure(error, attempt + 1));
                }
                Verdict::Retryable => {
                    self.breaker.release();
                    let delay = self.config.backoff.delay_with_hint(attempt, error.retry_after());
                    debug!(
                        %error,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "transient failure, backing off"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(FailureKind::Cancelled),
                        () = self.clock.sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn admit(&self, cancel: &CancellationToken) -> Result<(), FailureKind> {
        if cancel.is_cancelled() {
            return Err(FailureKind::Cancelled);
        }
        if !self.breaker.allow_request() {
            return Err(FailureKind::CircuitOpen {
                dependency: self.name.clone(),
                retry_after: self.breaker.retry_after(),
            });
        }
        let granted = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            granted = self.limiter.acquire_default() => Some(granted),
        };
        match granted {
            Some(true) => Ok(()),
            Some(false) => {
                self.breaker.release();
                Err(FailureKind::RateLimitTimeout { dependency: self.name.clone() })
            }
            None => {
                self.breaker.release();
                Err(FailureKind::Cancelled)
            }
        }
    }

    async fn run_attempt<T, F, Fut>(&self, operation: &mut F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        match self.config.attempt_timeout {
            None => operation().await,
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => Err(CallError::Timeout(format!("attempt exceeded {limit:?}"))),
            },
        }
    }
}

fn permanent_failure(error: CallError) -> FailureKind {
    match error {
        CallError::Status { code, message, retry_after } if code >= 500 => {
            FailureKind::ServerError { status: Some(code), attempts: 1, message, retry_after }
        }
        CallError::Status { code, message, .. } => {
            FailureKind::ClientError { status: Some(code), message }
        }
        other => FailureKind::ClientError { status: None, message: other.to_string() },
    }
}

fn exhausted_failure(error: CallError, attempts: u32) -> FailureKind {
    match error {
        CallError::Timeout(message) => FailureKind::Timeout { attempts, message },
        CallError::Status { code, message, retry_after } => {
            FailureKind::ServerError { status: Some(code), attempts, message, retry_after }
        }
        other => FailureKind::ServerError {
            status: None,
            attempts,
            message: other.to_string(),
            retry_after: None,
        },
    }
}
