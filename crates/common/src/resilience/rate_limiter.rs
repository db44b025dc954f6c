//! Sliding-window rate limiter with an optional daily cap
//!
//! Admission is decided against the timestamps of calls granted during the
//! last 60 seconds: a call is admitted while fewer than
//! `requests_per_minute` grants remain in that window. An optional
//! `requests_per_day` cap counts grants since the last UTC midnight and
//! denies everything once reached, whatever the minute window says.
//!
//! [`RateLimiter::try_acquire`] makes a single non-blocking decision;
//! [`RateLimiter::acquire`] retries it until a slot frees up or the timeout
//! budget runs out.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Days, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult};

/// Length of the sliding window
pub const WINDOW: Duration = Duration::from_secs(60);

/// Configuration for a [`RateLimiter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Grants allowed per rolling 60 second window
    pub requests_per_minute: u32,
    /// Grants allowed per UTC calendar day (`None` = unlimited)
    pub requests_per_day: Option<u32>,
    /// Budget used by [`RateLimiter::acquire_default`]
    pub acquire_timeout: Duration,
    /// Longest single sleep between admission attempts
    pub poll_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_day: None,
            acquire_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl RateLimiterConfig {
    /// Create a configuration builder
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.requests_per_minute == 0 {
            return Err(ConfigError::invalid("requests_per_minute", "must be greater than 0"));
        }
        if self.requests_per_day == Some(0) {
            return Err(ConfigError::invalid(
                "requests_per_day",
                "must be greater than 0 when set",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("poll_interval", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for RateLimiterConfig
#[derive(Debug, Default)]
pub struct RateLimiterConfigBuilder {
    config: RateLimiterConfig,
}

impl RateLimiterConfigBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sliding one-minute capacity
    pub fn requests_per_minute(mut self, limit: u32) -> Self {
        self.config.requests_per_minute = limit;
        self
    }

    /// Set the daily cap; `None` disables it
    pub fn requests_per_day(mut self, limit: Option<u32>) -> Self {
        self.config.requests_per_day = limit;
        self
    }

    /// Set how long `acquire_default` waits for a slot
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    /// Set the longest sleep between admission attempts
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> ConfigResult<RateLimiterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Result of a single admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A slot was granted and recorded
    Granted,
    /// The minute window is full; a slot frees up after this long
    Wait(Duration),
    /// The daily cap is exhausted until the next reset
    DailyCapReached {
        /// Time left until the daily counter rolls over
        reset_in: Duration,
    },
}

impl Admission {
    /// Whether this attempt was granted
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Point-in-time usage report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimiterStatus {
    pub minute_used: u32,
    pub minute_limit: u32,
    pub daily_used: u32,
    pub daily_limit: Option<u32>,
}

impl fmt::Display for RateLimiterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} per minute", self.minute_used, self.minute_limit)?;
        match self.daily_limit {
            Some(limit) => write!(f, ", {}/{} per day", self.daily_used, limit),
            None => write!(f, ", {} today", self.daily_used),
        }
    }
}

#[derive(Debug)]
struct WindowState {
    granted: VecDeque<Instant>,
    day_count: u32,
    day_resets_at: DateTime<Utc>,
}

impl WindowState {
    fn roll_day(&mut self, wall: DateTime<Utc>) {
        if wall >= self.day_resets_at {
            if self.day_count > 0 {
                debug!(previous = self.day_count, "daily rate limit counter reset");
            }
            self.day_count = 0;
            self.day_resets_at = next_utc_midnight(wall);
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.granted.front() {
            if now.saturating_duration_since(*oldest) >= WINDOW {
                self.granted.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window rate limiter
///
/// All state sits behind one mutex, so concurrent callers on the same
/// instance never over-admit. The lock is never held across an await.
pub struct RateLimiter<C: Clock = SystemClock> {
    config: RateLimiterConfig,
    state: Mutex<WindowState>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl RateLimiter<SystemClock> {
    /// Create a rate limiter on the system clock
    pub fn new(config: RateLimiterConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a rate limiter with a custom clock (useful for testing)
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> ConfigResult<Self> {
        Self::with_shared_clock(config, Arc::new(clock))
    }

    /// Create a rate limiter sharing an existing clock handle
    pub fn with_shared_clock(config: RateLimiterConfig, clock: Arc<C>) -> ConfigResult<Self> {
        config.validate()?;
        let state = WindowState {
            granted: VecDeque::with_capacity(config.requests_per_minute.min(1024) as usize),
            day_count: 0,
            day_resets_at: next_utc_midnight(clock.utc_now()),
        };
        Ok(Self { config, state: Mutex::new(state), clock })
    }

    /// Configuration this limiter was built with
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Clock driving this limiter
    pub fn clock(&self) -> &Arc<C> {
        &self.clock
    }

    /// Make one admission attempt without waiting.
    pub fn try_acquire(&self) -> Admission {
        let now = self.clock.now();
        let wall = self.clock.utc_now();
        let mut state = self.state.lock();

        state.roll_day(wall);
        if let Some(daily_limit) = self.config.requests_per_day {
            if state.day_count >= daily_limit {
                let reset_in = (state.day_resets_at - wall).to_std().unwrap_or_default();
                return Admission::DailyCapReached { reset_in };
            }
        }

        state.prune(now);
        if state.granted.len() < self.config.requests_per_minute as usize {
            state.granted.push_back(now);
            state.day_count = state.day_count.saturating_add(1);
            return Admission::Granted;
        }

        let wait = state
            .granted
            .front()
            .map_or(Duration::ZERO, |oldest| (*oldest + WINDOW).saturating_duration_since(now));
        Admission::Wait(wait)
    }

    /// Wait for a slot for at most `timeout`.
    ///
    /// Returns `false` once the budget is spent without a grant. Between
    /// attempts the caller sleeps for the shortest of the advertised wait,
    /// the poll interval and the remaining budget, so a long wait never
    /// overshoots the timeout.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let started = self.clock.now();
        loop {
            let wait = match self.try_acquire() {
                Admission::Granted => return true,
                Admission::Wait(wait) => wait,
                Admission::DailyCapReached { reset_in } => reset_in,
            };

            let spent = self.clock.now().saturating_duration_since(started);
            let Some(remaining) = timeout.checked_sub(spent).filter(|r| !r.is_zero()) else {
                warn!(
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    status = %self.status(),
                    "rate limiter acquire timed out"
                );
                return false;
            };

            if wait.is_zero() {
                continue;
            }
            let nap = wait.min(self.config.poll_interval).min(remaining);
            self.clock.sleep(nap).await;
        }
    }

    /// [`acquire`](Self::acquire) with the configured `acquire_timeout`
    pub async fn acquire_default(&self) -> bool {
        self.acquire(self.config.acquire_timeout).await
    }

    /// Current usage of the minute window and the daily cap
    pub fn status(&self) -> RateLimiterStatus {
        let now = self.clock.now();
        let wall = self.clock.utc_now();
        let mut state = self.state.lock();
        state.roll_day(wall);
        state.prune(now);
        RateLimiterStatus {
            minute_used: u32::try_from(state.granted.len()).unwrap_or(u32::MAX),
            minute_limit: self.config.requests_per_minute,
            daily_used: state.day_count,
            daily_limit: self.config.requests_per_day,
        }
    }

    /// Forget every grant, including the daily count
    pub fn reset(&self) {
        let wall = self.clock.utc_now();
        let mut state = self.state.lock();
        state.granted.clear();
        state.day_count = 0;
        state.day_resets_at = next_utc_midnight(wall);
    }
}

/// First UTC midnight strictly after `now`
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive().checked_add_days(Days::new(1)).unwrap_or(now.date_naive());
    tomorrow.and_hms_opt(0, 0, 0).map_or(now, |midnight| midnight.and_utc())
}
