//! Named [`ResilientTransport`]s, one per configured dependency

use std::collections::BTreeMap;
use std::sync::Arc;

use rxflow_common::{
    BackoffPolicy, CircuitBreakerConfig, Clock, ConfigError, RateLimiterConfig,
    ResilientTransport, SystemClock, TransportConfig, TransportStats,
};
use rxflow_domain::{Config, DependencyConfig, Result, RxflowError};
use tracing::info;

/// Transports keyed by dependency name
///
/// Every transport owns its limiter and breaker; batches sharing a registry
/// share those budgets.
pub struct TransportRegistry<C: Clock = SystemClock> {
    transports: BTreeMap<String, Arc<ResilientTransport<C>>>,
}

impl<C: Clock> std::fmt::Debug for TransportRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry").field("names", &self.names()).finish()
    }
}

impl TransportRegistry<SystemClock> {
    /// Build a transport for every dependency in `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::from_config_with_clock(config, SystemClock)
    }
}

impl<C: Clock + Clone> TransportRegistry<C> {
    /// [`from_config`](TransportRegistry::from_config) with every transport
    /// on `clock`
    pub fn from_config_with_clock(config: &Config, clock: C) -> Result<Self> {
        let mut transports = BTreeMap::new();
        for (name, dependency) in &config.dependencies {
            let transport = transport_for(name, dependency, clock.clone())?;
            info!(
                dependency = %name,
                requests_per_minute = dependency.requests_per_minute,
                requests_per_day = ?dependency.requests_per_day,
                max_retries = dependency.max_retries,
                "transport ready"
            );
            transports.insert(name.clone(), Arc::new(transport));
        }
        Ok(Self { transports })
    }
}

impl<C: Clock> TransportRegistry<C> {
    pub fn get(&self, name: &str) -> Option<Arc<ResilientTransport<C>>> {
        self.transports.get(name).cloned()
    }

    /// Like [`get`](Self::get), but a missing name is a config error
    pub fn require(&self, name: &str) -> Result<Arc<ResilientTransport<C>>> {
        self.get(name).ok_or_else(|| {
            RxflowError::Config(format!(
                "unknown dependency '{name}', configured: {}",
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.transports.keys().cloned().collect()
    }

    pub fn stats(&self) -> Vec<TransportStats> {
        self.transports.values().map(|transport| transport.stats()).collect()
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

/// Build one transport from its dependency settings
pub fn transport_for<C: Clock>(
    name: &str,
    dependency: &DependencyConfig,
    clock: C,
) -> Result<ResilientTransport<C>> {
    let limiter = RateLimiterConfig::builder()
        .requests_per_minute(dependency.requests_per_minute)
        .requests_per_day(dependency.requests_per_day)
        .acquire_timeout(dependency.acquire_timeout())
        .poll_interval(dependency.poll_interval())
        .build()
        .map_err(|err| config_error(name, err))?;

    let breaker = CircuitBreakerConfig::builder()
        .failure_threshold(dependency.failure_threshold)
        .success_threshold(dependency.success_threshold)
        .recovery_timeout(dependency.recovery_timeout())
        .half_open_max_calls(dependency.half_open_max_calls)
        .build()
        .map_err(|err| config_error(name, err))?;

    let backoff = BackoffPolicy::exponential(dependency.backoff_factor())
        .with_max_backoff(dependency.max_backoff())
        .with_max_jitter(dependency.max_jitter());

    let transport = TransportConfig::builder()
        .max_retries(dependency.max_retries)
        .backoff(backoff)
        .retry_on_status_codes(dependency.retry_on_status_codes.iter().copied())
        .not_found_is_benign(dependency.not_found_is_benign)
        .attempt_timeout(dependency.attempt_timeout())
        .build()
        .map_err(|err| config_error(name, err))?;

    ResilientTransport::with_clock(name, transport, limiter, breaker, clock)
        .map_err(|err| config_error(name, err))
}

fn config_error(name: &str, err: ConfigError) -> RxflowError {
    RxflowError::Config(format!("dependency '{name}': {err}"))
}
