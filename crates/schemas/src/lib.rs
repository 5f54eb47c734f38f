// Strand Schemas
//
// Decision: This crate is the source of truth for all shared data structures
// Decision: Minimal dependencies - only serde, uuid, chrono
// Decision: No runtime logic - only type definitions and serialization

pub mod approval;
pub mod events;
pub mod message;
pub mod result;
pub mod tool_types;
pub mod vector;

// Approval and checkpoint types
pub use approval::{ApprovalRequest, ApprovalStatus, Checkpoint, LoopState};

// Stream events
pub use events::StreamEvent;

// Message types
pub use message::{Message, MessageContent, MessageRole};

// Run results
pub use result::{AgentResult, TerminalState, TokenUsage};

// Tool types
pub use tool_types::{ToolCall, ToolPolicy, ToolResult, ToolSchema};

// Vector memory types
pub use vector::{SearchHit, VectorRecord};
