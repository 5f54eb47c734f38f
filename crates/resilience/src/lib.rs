// Strand Resilience
//
// Decision: Wrappers only act on stream establishment; a stream that started yielding is never replayed
// Decision: Only backend errors trip the breaker, drive retries and traverse the fallback chain
// Decision: The circuit breaker wraps the primary only; fallbacks are called as given

pub mod circuit_breaker;
pub mod fallback;
pub mod resilient;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use fallback::{FallbackChain, FallbackPolicy};
pub use resilient::{resilient, ResilientDriverBuilder};
pub use retry::{RetryPolicy, RetryingDriver};
