//! Retry policy and the retrying backend wrapper

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use strand_core::{
    open_stream, BackendErrorKind, LlmCallConfig, LlmDriver, LlmResponseStream, Message, Result,
    RuntimeError, SharedDriver,
};
use tracing::warn;

use crate::circuit_breaker::duration_millis;

/// Configuration for model call retries
///
/// Supports exponential backoff with jitter to avoid thundering herd.
///
/// # Example
///
/// ```
/// use strand_resilience::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(5)
///     .with_initial_interval(Duration::from_millis(500));
///
/// // First retry after ~0.5 seconds
/// // Second retry after ~1 second
/// // etc.
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial)
    pub max_attempts: u32,

    /// Initial delay before first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0); 0.1 means ±10% randomness
    pub jitter: f64,

    /// Backend error kinds that should NOT be retried
    #[serde(default)]
    pub non_retryable: Vec<BackendErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff: 3 attempts, 1 s initial, 60 s max, ×2, 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            jitter: 0.1,
            non_retryable: vec![],
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable: vec![],
        }
    }

    /// Create a policy with fixed intervals (no backoff)
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable: vec![],
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Set the jitter factor (clamped to 0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Never retry backend errors of this kind
    pub fn with_non_retryable(mut self, kind: BackendErrorKind) -> Self {
        self.non_retryable.push(kind);
        self
    }

    /// Calculate delay for a given attempt number (1-based)
    ///
    /// Returns the duration to wait before that attempt; zero for the first.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1;
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(retry_num as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let jitter_range = capped * self.jitter;
            let jitter_offset = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            (capped + jitter_offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Whether `error` is worth another attempt under this policy
    pub fn should_retry(&self, error: &RuntimeError) -> bool {
        if !error.is_retryable() {
            return false;
        }
        error
            .backend_kind()
            .map_or(true, |kind| !self.non_retryable.contains(&kind))
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

/// Retries stream establishment on retryable errors
///
/// A stream that fails before its first event is retried like a refused
/// call. A stream that already yielded an event is never replayed; a later
/// failure goes to the caller.
#[derive(Clone)]
pub struct RetryingDriver {
    inner: SharedDriver,
    policy: RetryPolicy,
}

impl RetryingDriver {
    pub fn new(inner: SharedDriver, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl std::fmt::Debug for RetryingDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingDriver")
            .field("backend", &self.inner.name())
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl LlmDriver for RetryingDriver {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn chat_completion_stream(
        &self,
        messages: Vec<Message>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        let mut attempt = 1;
        loop {
            let opened = match self.inner.chat_completion_stream(messages.clone(), config).await {
                Ok(stream) => open_stream(stream).await,
                Err(e) => Err(e),
            };
            match opened {
                Ok(stream) => return Ok(stream),
                Err(e) if self.policy.should_retry(&e) && self.policy.has_attempts_remaining(attempt) => {
                    attempt += 1;
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        backend = %self.inner.name(),
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying model call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strand_core::{MockFailure, MockLlmDriver, MockLlmResponse};

    #[test]
    fn test_exponential_defaults() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert_eq!(policy.max_interval, Duration::from_secs(60));
        assert_eq!(policy.backoff_coefficient, 2.0);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::exponential()
            .with_jitter(0.0)
            .with_max_interval(Duration::from_secs(3));
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::exponential().with_jitter(0.1);
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(2).as_secs_f64();
            assert!((0.9..=1.1).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::exponential().with_non_retryable(BackendErrorKind::RateLimited);
        assert!(policy.should_retry(&RuntimeError::server("500")));
        assert!(policy.should_retry(&RuntimeError::circuit_open("mock")));
        assert!(!policy.should_retry(&RuntimeError::rate_limited("slow down")));
        assert!(!policy.should_retry(&RuntimeError::invalid_request("bad")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let driver = MockLlmDriver::with_responses(vec![
            MockLlmResponse::server_error("1"),
            MockLlmResponse::server_error("2"),
            MockLlmResponse::text("third time"),
        ]);
        let retrying = RetryingDriver::new(Arc::new(driver.clone()), RetryPolicy::exponential());

        let response = retrying
            .chat_completion(vec![Message::user("hi")], &LlmCallConfig::default())
            .await
            .unwrap();
        assert_eq!(response.text, "third time");
        assert_eq!(driver.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let driver = MockLlmDriver::failing("down");
        let retrying = RetryingDriver::new(
            Arc::new(driver.clone()),
            RetryPolicy::fixed(Duration::from_millis(100), 2),
        );

        let err = retrying
            .chat_completion(vec![Message::user("hi")], &LlmCallConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_backend());
        assert_eq!(driver.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stream_failing_before_output() {
        let driver = MockLlmDriver::with_responses(vec![
            MockLlmResponse::failure(MockFailure::MidStream("overloaded".into())),
            MockLlmResponse::text("recovered"),
        ]);
        let retrying = RetryingDriver::new(Arc::new(driver.clone()), RetryPolicy::exponential());

        let response = retrying
            .chat_completion(vec![Message::user("hi")], &LlmCallConfig::default())
            .await
            .unwrap();
        assert_eq!(response.text, "recovered");
        assert_eq!(driver.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_retries_caller_errors() {
        let driver = MockLlmDriver::always(MockLlmResponse::failure(MockFailure::InvalidRequest(
            "too long".into(),
        )));
        let retrying = RetryingDriver::new(Arc::new(driver.clone()), RetryPolicy::exponential());

        let err = retrying
            .chat_completion(vec![Message::user("hi")], &LlmCallConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidRequest(_)));
        assert_eq!(driver.call_count(), 1);
    }
}
