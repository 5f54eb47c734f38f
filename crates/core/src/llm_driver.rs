// Model backend abstraction
//
// A model backend handle is an `Arc<dyn LlmDriver>`. Resilience layers
// (breaker, retry, fallback) implement the same trait so composition is
// invisible to the execution loop.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use strand_schemas::{Message, TokenUsage, ToolCall, ToolSchema};

use crate::error::{Result, RuntimeError};

// ============================================================================
// Stream types
// ============================================================================

/// Type alias for the model response stream
pub type LlmResponseStream = Pin<Box<dyn Stream<Item = Result<LlmStreamEvent>> + Send>>;

/// Shared model backend handle
pub type SharedDriver = Arc<dyn LlmDriver>;

/// Events emitted during model streaming
#[derive(Debug, Clone)]
pub enum LlmStreamEvent {
    /// Text delta (incremental content)
    TextDelta(String),
    /// Tool calls requested by the model
    ToolCalls(Vec<ToolCall>),
    /// Streaming completed
    Done(LlmCompletionMetadata),
    /// Provider reported an error mid-stream
    Error(String),
}

/// Metadata about a completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmCompletionMetadata {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

impl LlmCompletionMetadata {
    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(
            self.input_tokens.unwrap_or_default(),
            self.output_tokens.unwrap_or_default(),
        )
    }
}

/// Per-call options passed to the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmCallConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Tool catalogue schema sent alongside the history
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
}

/// Accumulated non-streaming response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub metadata: LlmCompletionMetadata,
}

// ============================================================================
// LlmDriver Trait
// ============================================================================

/// Trait for model backends
///
/// Implementations handle provider-specific calls and response parsing.
/// Failures that should count toward circuit breakers must be reported as
/// `RuntimeError::Backend`; problems with the caller's own request as
/// `RuntimeError::InvalidRequest`.
#[async_trait]
pub trait LlmDriver: Send + Sync {
    /// Backend name used in logs and circuit-open errors
    fn name(&self) -> &str;

    /// Call the model with a streaming response
    async fn chat_completion_stream(
        &self,
        messages: Vec<Message>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream>;

    /// Call the model without streaming (accumulates the stream)
    async fn chat_completion(
        &self,
        messages: Vec<Message>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponse> {
        let stream = self.chat_completion_stream(messages, config).await?;
        collect_response(stream).await
    }
}

#[async_trait]
impl LlmDriver for Arc<dyn LlmDriver> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn chat_completion_stream(
        &self,
        messages: Vec<Message>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        (**self).chat_completion_stream(messages, config).await
    }

    async fn chat_completion(
        &self,
        messages: Vec<Message>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponse> {
        (**self).chat_completion(messages, config).await
    }
}

/// Drain a response stream into a single response
pub async fn collect_response(mut stream: LlmResponseStream) -> Result<LlmResponse> {
    let mut response = LlmResponse::default();

    while let Some(event) = stream.next().await {
        match event? {
            LlmStreamEvent::TextDelta(delta) => response.text.push_str(&delta),
            LlmStreamEvent::ToolCalls(calls) => response.tool_calls.extend(calls),
            LlmStreamEvent::Done(metadata) => {
                response.metadata = metadata;
                break;
            }
            LlmStreamEvent::Error(message) => return Err(RuntimeError::server(message)),
        }
    }

    Ok(response)
}

/// Wait for the first event of a freshly opened stream
///
/// A stream whose first item is an error, or that ends without producing
/// anything, is reported as a failed call so wrappers can treat it like a
/// refused connection. Otherwise the first event is put back in front of the
/// remaining stream.
pub async fn open_stream(mut stream: LlmResponseStream) -> Result<LlmResponseStream> {
    match stream.next().await {
        Some(Ok(LlmStreamEvent::Error(message))) => Err(RuntimeError::server(message)),
        Some(Err(e)) => Err(e),
        None => Err(RuntimeError::server("stream ended before any output")),
        Some(Ok(first)) => Ok(Box::pin(futures::stream::once(async move { Ok(first) }).chain(stream))),
    }
}
