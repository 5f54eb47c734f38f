// Strand Core Runtime
//
// Decision: One step loop drives both synchronous and streaming runs
// Decision: Backends, checkpoint stores and event sinks are traits injected at construction
// Decision: In-memory implementations and the scripted mock driver live here for tests
// Decision: Resilience wrappers and vector memory live in their own crates on top of LlmDriver

pub mod config;
pub mod error;
pub mod executor;
pub mod guardrails;
pub mod hitl;
pub mod llm_driver;
pub mod mcp;
pub mod memory;
pub mod network;
pub mod stream;
pub mod tools;
pub mod traits;
pub mod validation;

// Configuration and errors
pub use config::{AgentConfig, StopCondition};
pub use error::{BackendErrorKind, Result, RuntimeError};

// Agent loop
pub use executor::Agent;
pub use stream::AgentEventStream;

// LLM backend abstraction
pub use llm_driver::{
    collect_response, open_stream, LlmCallConfig, LlmCompletionMetadata, LlmDriver, LlmResponse,
    LlmResponseStream, LlmStreamEvent, SharedDriver,
};

// Tools
pub use tools::{
    EchoTool, FailingTool, FnTool, Tool, ToolExecutionResult, ToolRegistry, ToolRegistryBuilder,
};
pub use validation::{CoercionStrategy, ToolValidator};

// Guardrails
pub use guardrails::{
    ContentModeration, Guardrail, GuardrailAction, GuardrailOutcome, GuardrailPipeline,
    GuardrailReport, GuardrailStage, GuardrailVerdict, PiiAction, PiiDetection, RegexFilter,
    SchemaGuardrail, TokenLimit,
};

// Human-in-the-loop
pub use hitl::ApprovalManager;

// Multi-agent
pub use network::{AgentCard, AgentNetwork, AgentNetworkBuilder, BroadcastOutcome, Delegation};

// Tool protocol
pub use mcp::{JsonRpcRequest, JsonRpcResponse, McpServer, McpTool};

// Ports and in-memory implementations
pub use memory::{
    CollectingEventEmitter, InMemoryCheckpointStore, MockFailure, MockLlmDriver, MockLlmResponse,
};
pub use traits::{CheckpointStore, EventEmitter, NoopEventEmitter};

// Re-export shared types so callers need a single dependency
pub use strand_schemas::{
    AgentResult, ApprovalRequest, ApprovalStatus, Checkpoint, LoopState, Message, MessageContent,
    MessageRole, StreamEvent, TerminalState, TokenUsage, ToolCall, ToolPolicy, ToolResult,
    ToolSchema,
};
