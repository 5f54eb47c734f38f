//! Composition of the resilience wrappers into one backend handle

use std::sync::Arc;

use strand_core::{LlmDriver, SharedDriver};
use tracing::debug;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::fallback::{FallbackChain, FallbackPolicy};
use crate::retry::{RetryPolicy, RetryingDriver};

/// Builder for a resilient model handle
///
/// Wrapping order, innermost to outermost: circuit breaker around the
/// primary, retry, then the fallback chain. Every layer is optional and the
/// result is an ordinary `SharedDriver`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use strand_core::{LlmDriver, MockLlmDriver};
/// use strand_resilience::{resilient, CircuitBreakerConfig, RetryPolicy};
///
/// let handle = resilient(Arc::new(MockLlmDriver::new()))
///     .circuit_breaker(CircuitBreakerConfig::default())
///     .retry(RetryPolicy::exponential())
///     .fallback(Arc::new(MockLlmDriver::new().named("backup")))
///     .build();
/// assert_eq!(handle.name(), "mock");
/// ```
pub struct ResilientDriverBuilder {
    primary: SharedDriver,
    fallbacks: Vec<SharedDriver>,
    retry: Option<RetryPolicy>,
    circuit_breaker: Option<CircuitBreakerConfig>,
    fallback_policy: FallbackPolicy,
}

impl ResilientDriverBuilder {
    pub fn new(primary: SharedDriver) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            retry: None,
            circuit_breaker: None,
            fallback_policy: FallbackPolicy::default(),
        }
    }

    /// Add a fallback backend, tried after the primary and earlier fallbacks
    pub fn fallback(mut self, driver: SharedDriver) -> Self {
        self.fallbacks.push(driver);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.fallback_policy = policy;
        self
    }

    pub fn build(self) -> SharedDriver {
        let mut driver = self.primary;

        if let Some(config) = self.circuit_breaker {
            driver = Arc::new(CircuitBreaker::new(driver, config));
        }

        if let Some(policy) = self.retry {
            driver = Arc::new(RetryingDriver::new(driver, policy));
        }

        if !self.fallbacks.is_empty() {
            driver = Arc::new(
                FallbackChain::with_primary(driver, self.fallbacks).with_policy(self.fallback_policy),
            );
        }

        debug!(backend = %driver.name(), "Built resilient model handle");
        driver
    }
}

/// Start building a resilient handle around `primary`
pub fn resilient(primary: SharedDriver) -> ResilientDriverBuilder {
    ResilientDriverBuilder::new(primary)
}
