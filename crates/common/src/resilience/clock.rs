//! Time abstraction shared by the resilience primitives
//!
//! The rate limiter, circuit breaker and transport never read the system
//! clock directly. They go through [`Clock`], which lets production code use
//! real time and tests use [`MockClock`] (manually advanced) or
//! [`TokioClock`] (driven by a paused tokio runtime).

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;

/// Trait for time operations to enable deterministic testing
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Suspend the caller for `duration` as measured by this clock.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Wall clock as a UTC timestamp
    fn utc_now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.system_time())
    }

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        let millis = self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX)
    }
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// Clock backed by tokio's timer
///
/// Under `#[tokio::test(start_paused = true)]` the runtime auto-advances
/// time whenever every task is idle, so sleeps complete instantly while
/// `now()` still moves forward by the slept amount.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// Implement Clock for Arc<T> where T: Clock for convenient cloning
impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        (**self).sleep(duration)
    }
}

/// Mock clock for deterministic testing
///
/// Time only moves when the test calls [`MockClock::advance`] or when code
/// under test sleeps: `sleep` advances the clock by the requested amount and
/// resolves immediately. Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    wall_start: SystemTime,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock whose wall clock starts at the UNIX epoch
    pub fn new() -> Self {
        Self::with_wall_clock(UNIX_EPOCH)
    }

    /// Create a mock clock whose wall clock starts at `wall_start`
    pub fn with_wall_clock(wall_start: SystemTime) -> Self {
        Self { start: Instant::now(), wall_start, elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Create a mock clock starting at the given UTC timestamp
    pub fn at_utc(start: DateTime<Utc>) -> Self {
        Self::with_wall_clock(SystemTime::from(start))
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Advance the mock clock by milliseconds (convenience method)
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the mock clock to a specific elapsed time
    pub fn set_elapsed(&self, duration: Duration) {
        *self.elapsed.lock() = duration;
    }

    /// Get the current elapsed time
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.wall_start + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.advance(duration);
        future::ready(()).boxed()
    }
}
