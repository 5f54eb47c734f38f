//! Circuit breaker around a model backend
//!
//! Protects a failing backend from further load. When consecutive backend
//! failures reach the threshold the circuit "opens" and calls fail fast with
//! `RuntimeError::CircuitOpen` without reaching the backend.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐  failure threshold  ┌─────────┐  reset timeout  ┌──────────┐
//! │ Closed  │ ──────────────────► │  Open   │ ──────────────► │ HalfOpen │
//! └─────────┘                     └─────────┘                 └──────────┘
//!      ▲                               ▲        probe fails        │
//!      │                               └───────────────────────────┤
//!      │              success threshold                            │
//!      └───────────────────────────────────────────────────────────┘
//! ```
//!
//! HalfOpen admits one probe call at a time. A call counts as a success only
//! once its response stream completes; an `Error` event mid-stream counts as a
//! failure.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strand_core::{
    LlmCallConfig, LlmDriver, LlmResponseStream, LlmStreamEvent, Message, Result, RuntimeError,
    SharedDriver,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,

    /// Failure threshold exceeded - all calls rejected
    Open,

    /// Testing if the backend recovered - one probe at a time
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
///
/// # Example
///
/// ```
/// use strand_resilience::CircuitBreakerConfig;
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::default()
///     .with_failure_threshold(3)
///     .with_reset_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive backend failures required to open the circuit
    pub failure_threshold: u32,

    /// Successful probes required to close the circuit from half-open
    pub success_threshold: u32,

    /// Time to wait before transitioning from open to half-open
    #[serde(with = "duration_millis")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold to open the circuit
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the success threshold to close the circuit
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    /// Set the reset timeout (time before probing again after opening)
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// ============================================================================
// Breaker state
// ============================================================================

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Admission ticket for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Probe,
}

#[derive(Debug)]
struct Breaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl Breaker {
    fn acquire(&self) -> Result<Permit> {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => Ok(Permit::Normal),
            CircuitState::Open => {
                let cooled = state
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.reset_timeout);
                if !cooled {
                    return Err(RuntimeError::circuit_open(&self.name));
                }
                state.state = CircuitState::HalfOpen;
                state.half_open_successes = 0;
                state.probe_in_flight = true;
                info!(backend = %self.name, "Circuit half-open; sending probe");
                Ok(Permit::Probe)
            }
            CircuitState::HalfOpen if state.probe_in_flight => {
                Err(RuntimeError::circuit_open(&self.name))
            }
            CircuitState::HalfOpen => {
                state.probe_in_flight = true;
                Ok(Permit::Probe)
            }
        }
    }

    fn record_success(&self, permit: Permit) {
        let mut state = self.state.lock();
        match (permit, state.state) {
            (Permit::Probe, CircuitState::HalfOpen) => {
                state.probe_in_flight = false;
                state.half_open_successes += 1;
                if state.half_open_successes >= self.config.success_threshold {
                    *state = BreakerState::default();
                    info!(backend = %self.name, "Circuit closed");
                }
            }
            (_, CircuitState::Closed) => state.consecutive_failures = 0,
            // a late success from before the circuit opened changes nothing
            _ => {}
        }
    }

    fn record_failure(&self, permit: Permit) {
        let mut state = self.state.lock();
        match (permit, state.state) {
            (Permit::Probe, CircuitState::HalfOpen) => {
                state.probe_in_flight = false;
                self.open(&mut state);
            }
            (_, CircuitState::Closed) => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut state);
                }
            }
            _ => {}
        }
    }

    /// The call ended without a verdict (non-backend error or abandoned stream)
    fn release(&self, permit: Permit) {
        if permit == Permit::Probe {
            self.state.lock().probe_in_flight = false;
        }
    }

    fn open(&self, state: &mut BreakerState) {
        warn!(
            backend = %self.name,
            failures = state.consecutive_failures,
            reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
            "Circuit opened"
        );
        state.state = CircuitState::Open;
        state.opened_at = Some(Instant::now());
        state.half_open_successes = 0;
    }

    fn settle(&self, permit: Permit, error: Option<&RuntimeError>) {
        match error {
            None => self.record_success(permit),
            Some(e) if e.is_backend() => self.record_failure(permit),
            Some(_) => self.release(permit),
        }
    }
}

// ============================================================================
// CircuitBreaker - LlmDriver wrapper
// ============================================================================

/// Wraps a backend with a per-handle circuit breaker
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: SharedDriver,
    breaker: Arc<Breaker>,
}

impl CircuitBreaker {
    pub fn new(inner: SharedDriver, config: CircuitBreakerConfig) -> Self {
        let breaker = Breaker {
            name: inner.name().to_string(),
            config,
            state: Mutex::new(BreakerState::default()),
        };
        Self {
            inner,
            breaker: Arc::new(breaker),
        }
    }

    /// Wrap with the default configuration
    pub fn wrap(inner: SharedDriver) -> Self {
        Self::new(inner, CircuitBreakerConfig::default())
    }

    /// Current state. An open circuit past its reset timeout still reports
    /// `Open` until the next call probes it.
    pub fn state(&self) -> CircuitState {
        self.breaker.state.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.breaker.state.lock().consecutive_failures
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.breaker.config
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("backend", &self.breaker.name)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl LlmDriver for CircuitBreaker {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn chat_completion_stream(
        &self,
        messages: Vec<Message>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        let permit = self.breaker.acquire().inspect_err(|_| {
            debug!(backend = %self.breaker.name, "Circuit open; rejecting call");
        })?;

        match self.inner.chat_completion_stream(messages, config).await {
            Ok(stream) => Ok(Box::pin(ObservedStream {
                inner: stream,
                breaker: self.breaker.clone(),
                permit: Some(permit),
            })),
            Err(e) => {
                self.breaker.settle(permit, Some(&e));
                Err(e)
            }
        }
    }
}

/// Reports the stream's outcome to the breaker exactly once
struct ObservedStream {
    inner: LlmResponseStream,
    breaker: Arc<Breaker>,
    permit: Option<Permit>,
}

impl ObservedStream {
    fn settle(&mut self, error: Option<&RuntimeError>) {
        if let Some(permit) = self.permit.take() {
            self.breaker.settle(permit, error);
        }
    }
}

impl Stream for ObservedStream {
    type Item = Result<LlmStreamEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(LlmStreamEvent::Done(_)))) | Poll::Ready(None) => this.settle(None),
            Poll::Ready(Some(Ok(LlmStreamEvent::Error(message)))) => {
                this.settle(Some(&RuntimeError::server(message.clone())))
            }
            Poll::Ready(Some(Err(e))) => this.settle(Some(e)),
            _ => {}
        }
        polled
    }
}

impl Drop for ObservedStream {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.breaker.release(permit);
        }
    }
}
