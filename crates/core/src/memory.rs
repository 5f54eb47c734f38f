// In-memory implementations for examples and testing
//
// These implementations keep all data in memory, making them useful for:
// - Unit and integration tests
// - Standalone examples that don't need a real backend
// - Quick prototyping

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use strand_schemas::{Checkpoint, Message, StreamEvent, ToolCall};
use tokio::sync::RwLock;

use crate::error::{BackendErrorKind, Result, RuntimeError};
use crate::llm_driver::{
    LlmCallConfig, LlmCompletionMetadata, LlmDriver, LlmResponseStream, LlmStreamEvent,
};
use crate::traits::{CheckpointStore, EventEmitter};

// ============================================================================
// InMemoryCheckpointStore - Stores checkpoints in memory
// ============================================================================

/// In-memory checkpoint store keyed by checkpoint id
#[derive(Debug, Default, Clone)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<String, Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.id.clone(), checkpoint);
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Checkpoint> {
        self.checkpoints
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::CheckpointNotFound(id.to_string()))
    }

    async fn list(&self, agent_name: &str) -> Result<Vec<Checkpoint>> {
        let mut checkpoints: Vec<Checkpoint> = self
            .checkpoints
            .read()
            .await
            .values()
            .filter(|c| c.agent_name == agent_name)
            .cloned()
            .collect();
        checkpoints.sort_by_key(|c| c.created_at);
        Ok(checkpoints)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.checkpoints.write().await.remove(id).is_some())
    }
}

// ============================================================================
// CollectingEventEmitter - Records emitted events
// ============================================================================

/// Emitter that records every event, for assertions in tests
#[derive(Debug, Default, Clone)]
pub struct CollectingEventEmitter {
    events: Arc<Mutex<Vec<StreamEvent>>>,
}

impl CollectingEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().clone()
    }

    /// Wire tags of the recorded events, in order
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(StreamEvent::event_type).collect()
    }
}

#[async_trait]
impl EventEmitter for CollectingEventEmitter {
    async fn emit(&self, event: StreamEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

// ============================================================================
// MockLlmDriver - Returns scripted responses
// ============================================================================

/// A scripted model response
#[derive(Debug, Clone, PartialEq)]
pub struct MockLlmResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Fail the call instead of answering
    pub failure: Option<MockFailure>,
}

/// A scripted failure, converted to a `RuntimeError` when replayed
#[derive(Debug, Clone, PartialEq)]
pub enum MockFailure {
    Backend(BackendErrorKind, String),
    InvalidRequest(String),
    /// Fail after the first text delta was streamed
    MidStream(String),
}

impl MockFailure {
    fn to_error(&self) -> RuntimeError {
        match self {
            MockFailure::Backend(kind, message) => RuntimeError::backend(*kind, message.clone()),
            MockFailure::InvalidRequest(message) => RuntimeError::invalid_request(message.clone()),
            MockFailure::MidStream(message) => RuntimeError::server(message.clone()),
        }
    }
}

impl MockLlmResponse {
    /// Text-only response
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            input_tokens: 10,
            output_tokens: 5,
            failure: None,
        }
    }

    /// Response requesting tool calls
    pub fn with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::text(text)
        }
    }

    pub fn failure(failure: MockFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::text("")
        }
    }

    /// Transient server failure
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::failure(MockFailure::Backend(BackendErrorKind::Server, message.into()))
    }

    pub fn usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    responses: VecDeque<MockLlmResponse>,
    calls: Vec<Vec<Message>>,
    configs: Vec<LlmCallConfig>,
}

/// Mock model backend for testing
///
/// Returns scripted responses in order; once the script runs out, every call
/// gets the fallback response.
#[derive(Debug, Clone)]
pub struct MockLlmDriver {
    name: String,
    state: Arc<Mutex<MockState>>,
    fallback: MockLlmResponse,
}

impl Default for MockLlmDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmDriver {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
            fallback: MockLlmResponse::text("Mock response (no more responses configured)"),
        }
    }

    pub fn with_responses(responses: Vec<MockLlmResponse>) -> Self {
        let driver = Self::new();
        driver.state.lock().responses = responses.into();
        driver
    }

    /// Driver that answers every call with `response`
    pub fn always(response: MockLlmResponse) -> Self {
        Self {
            fallback: response,
            ..Self::new()
        }
    }

    /// Driver whose every call fails with a server error
    pub fn failing(message: impl Into<String>) -> Self {
        Self::always(MockLlmResponse::server_error(message))
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn push_response(&self, response: MockLlmResponse) {
        self.state.lock().responses.push_back(response);
    }

    /// Message histories received, one entry per call
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.state.lock().calls.clone()
    }

    /// Call configs received, one entry per call
    pub fn call_configs(&self) -> Vec<LlmCallConfig> {
        self.state.lock().configs.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }
}

#[async_trait]
impl LlmDriver for MockLlmDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat_completion_stream(
        &self,
        messages: Vec<Message>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        let response = {
            let mut state = self.state.lock();
            state.calls.push(messages);
            state.configs.push(config.clone());
            state
                .responses
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        };

        // Text is streamed word by word so consumers see several deltas
        let mut events: Vec<Result<LlmStreamEvent>> = response
            .text
            .split_inclusive(' ')
            .map(|chunk| Ok(LlmStreamEvent::TextDelta(chunk.to_string())))
            .collect();

        match &response.failure {
            Some(MockFailure::MidStream(message)) => {
                events.truncate(1);
                events.push(Ok(LlmStreamEvent::Error(message.clone())));
                return Ok(Box::pin(stream::iter(events)));
            }
            Some(failure) => return Err(failure.to_error()),
            None => {}
        }

        let finish_reason = if response.tool_calls.is_empty() {
            "stop"
        } else {
            "tool_calls"
        };
        if !response.tool_calls.is_empty() {
            events.push(Ok(LlmStreamEvent::ToolCalls(response.tool_calls.clone())));
        }
        events.push(Ok(LlmStreamEvent::Done(LlmCompletionMetadata {
            input_tokens: Some(response.input_tokens),
            output_tokens: Some(response.output_tokens),
            model: config.model.clone(),
            finish_reason: Some(finish_reason.to_string()),
        })));

        Ok(Box::pin(stream::iter(events)))
    }
}
