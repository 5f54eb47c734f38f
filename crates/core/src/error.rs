// Error types for the runtime
//
// Only `Backend` errors count toward circuit-breaker accounting and fallback
// traversal. Everything else propagates typed so callers can tell "retry later"
// from "change the input" from "ask a human".

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Classification of a model backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    Timeout,
    RateLimited,
    /// 5xx or malformed response from the provider
    Server,
    /// Transport failure before a response arrived
    Connection,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Server => write!(f, "server"),
            Self::Connection => write!(f, "connection"),
        }
    }
}

/// Errors that can occur while driving the runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Transient model backend failure
    #[error("Backend error ({kind}): {message}")]
    Backend {
        kind: BackendErrorKind,
        message: String,
    },

    /// Model asked for a tool the catalogue does not have
    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    /// Tool arguments failed schema validation after coercion
    #[error("Invalid arguments for tool '{tool}': {message}")]
    ToolValidation { tool: String, message: String },

    /// A guardrail blocked the content
    #[error("Blocked by guardrail '{guardrail}': {reason}")]
    GuardrailBlocked { guardrail: String, reason: String },

    /// Circuit breaker is open; the backend was not contacted
    #[error("Circuit open for backend '{backend}'")]
    CircuitOpen { backend: String },

    /// Approval for a tool call was denied
    #[error("Approval denied for tool '{tool}'{}", .reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    ApprovalDenied { tool: String, reason: Option<String> },

    #[error("Approval request not found: {0}")]
    ApprovalNotFound(Uuid),

    #[error("Approval request already resolved: {0}")]
    ApprovalAlreadyResolved(Uuid),

    /// Final answer did not satisfy the caller's output schema
    #[error("Structured output invalid: {0}")]
    StructuredOutputInvalid(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Delegation from '{from}' to '{to}' is not allowed")]
    DelegationNotAllowed { from: String, to: String },

    /// Caller's request was malformed. Never trips a breaker.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Every backend in a fallback chain failed
    #[error("All {} backends failed; last error: {}", .0.len(), .0.last().map(|e| e.to_string()).unwrap_or_default())]
    FallbackExhausted(Vec<RuntimeError>),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RuntimeError {
    pub fn backend(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        RuntimeError::Backend {
            kind,
            message: message.into(),
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::backend(BackendErrorKind::Server, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::backend(BackendErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::backend(BackendErrorKind::RateLimited, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        RuntimeError::Configuration(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        RuntimeError::InvalidRequest(message.into())
    }

    pub fn circuit_open(backend: impl Into<String>) -> Self {
        RuntimeError::CircuitOpen {
            backend: backend.into(),
        }
    }

    /// True for failures that count toward breaker thresholds and fallback
    pub fn is_backend(&self) -> bool {
        matches!(self, RuntimeError::Backend { .. })
    }

    /// Kind of a backend failure, if this is one
    pub fn backend_kind(&self) -> Option<BackendErrorKind> {
        match self {
            RuntimeError::Backend { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True when the same request may succeed later
    pub fn is_retryable(&self) -> bool {
        self.is_backend() || matches!(self, RuntimeError::CircuitOpen { .. })
    }
}
