//! Ordered fallback across model backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strand_core::{
    open_stream, BackendErrorKind, LlmCallConfig, LlmDriver, LlmResponseStream, Message, Result,
    RuntimeError, SharedDriver,
};
use tracing::warn;

/// When to move on to the next backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "kinds", rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Any backend error or open circuit
    #[default]
    OnAnyBackendError,
    /// Only these backend error kinds (an open circuit always falls through)
    OnKinds(Vec<BackendErrorKind>),
}

impl FallbackPolicy {
    pub fn should_fall_through(&self, error: &RuntimeError) -> bool {
        if matches!(error, RuntimeError::CircuitOpen { .. }) {
            return true;
        }
        match (self, error.backend_kind()) {
            (_, None) => false,
            (FallbackPolicy::OnAnyBackendError, Some(_)) => true,
            (FallbackPolicy::OnKinds(kinds), Some(kind)) => kinds.contains(&kind),
        }
    }
}

/// Tries backends in order until one accepts the call
///
/// Every call starts with the first backend. A backend whose stream fails
/// before its first event counts as a failed attempt; once an event has been
/// handed to the caller the chain is committed to that backend. Errors outside
/// the policy stop the chain immediately; when every backend fails, the caller gets
/// `RuntimeError::FallbackExhausted` carrying each failure in order.
#[derive(Clone)]
pub struct FallbackChain {
    name: String,
    drivers: Vec<SharedDriver>,
    policy: FallbackPolicy,
}

impl FallbackChain {
    pub fn new(drivers: Vec<SharedDriver>) -> Result<Self> {
        let first = drivers
            .first()
            .ok_or_else(|| RuntimeError::configuration("fallback chain needs at least one backend"))?;
        Ok(Self {
            name: first.name().to_string(),
            drivers,
            policy: FallbackPolicy::default(),
        })
    }

    /// Chain headed by `primary`; cannot be empty
    pub fn with_primary(primary: SharedDriver, fallbacks: Vec<SharedDriver>) -> Self {
        let name = primary.name().to_string();
        let mut drivers = Vec::with_capacity(fallbacks.len() + 1);
        drivers.push(primary);
        drivers.extend(fallbacks);
        Self {
            name,
            drivers,
            policy: FallbackPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &FallbackPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.drivers.iter().map(|d| d.name()).collect();
        f.debug_struct("FallbackChain")
            .field("backends", &names)
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl LlmDriver for FallbackChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat_completion_stream(
        &self,
        messages: Vec<Message>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        let mut errors = Vec::with_capacity(self.drivers.len());

        for (index, driver) in self.drivers.iter().enumerate() {
            let attempt = match driver.chat_completion_stream(messages.clone(), config).await {
                Ok(stream) => open_stream(stream).await,
                Err(e) => Err(e),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(e) if self.policy.should_fall_through(&e) => {
                    if let Some(next) = self.drivers.get(index + 1) {
                        warn!(
                            backend = %driver.name(),
                            next = %next.name(),
                            error = %e,
                            "Falling back to next backend"
                        );
                    }
                    errors.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        warn!(backends = self.drivers.len(), "All fallback backends failed");
        Err(RuntimeError::FallbackExhausted(errors))
    }
}
