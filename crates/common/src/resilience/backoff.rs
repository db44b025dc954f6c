//! Exponential backoff with random jitter
//!
//! The delay before retry `n` (zero-based) is
//! `backoff_factor * 2^n + uniform(0, max_jitter)`, capped at `max_backoff`.

use std::time::Duration;

use rand::Rng;

use crate::error::{ConfigError, ConfigResult};

/// Delay schedule between transport retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Base delay, doubled on every attempt
    pub backoff_factor: Duration,
    /// Upper bound for any computed delay (jitter included)
    pub max_backoff: Duration,
    /// Upper bound of the random component added to each delay
    pub max_jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            backoff_factor: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl BackoffPolicy {
    /// Policy with the given factor and default caps
    pub fn exponential(backoff_factor: Duration) -> Self {
        Self { backoff_factor, ..Self::default() }
    }

    /// Same schedule without the random component
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    #[must_use]
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Validate the policy
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_backoff < self.backoff_factor {
            return Err(ConfigError::invalid(
                "max_backoff",
                "must be greater than or equal to backoff_factor",
            ));
        }
        Ok(())
    }

    /// Deterministic part of the delay for `attempt` (zero-based)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.backoff_factor.saturating_mul(multiplier).min(self.max_backoff)
    }

    /// Delay before retry `attempt`, jitter included
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..=self.max_jitter)
        };
        self.base_delay(attempt).saturating_add(jitter).min(self.max_backoff)
    }

    /// Delay before retry `attempt`, never shorter than a server hint
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self.delay_for(attempt);
        retry_after.map_or(computed, |hint| computed.max(hint))
    }
}
