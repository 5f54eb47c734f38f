// Stream events
//
// Ordered, append-only events emitted by a streaming run. Serialized with a
// `type` tag (`text_delta`, `done`, ...). Payloads with an unknown tag are kept
// verbatim in `Raw` so callers can pass them through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::approval::ApprovalRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental model text. `text` is everything generated so far in the step.
    TextDelta { delta: String, text: String },

    ToolCallStarted {
        id: String,
        name: String,
        arguments: Value,
    },

    ToolCallResult {
        id: String,
        name: String,
        result: Value,
        is_error: bool,
    },

    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },

    FinishReason { reason: String },

    ApprovalRequested { request: ApprovalRequest },

    /// A loop step completed. `tool_calls` names the tools it ran, in call order.
    StepFinished {
        step: usize,
        tool_calls: Vec<String>,
        input_tokens: u64,
        output_tokens: u64,
    },

    /// A guardrail warned but let the content through
    Warning { source: String, message: String },

    Error { message: String },

    /// Always the last event of a stream
    Done { text: String },

    #[serde(untagged)]
    Raw(Value),
}

impl StreamEvent {
    pub fn text_delta(delta: impl Into<String>, text: impl Into<String>) -> Self {
        StreamEvent::TextDelta {
            delta: delta.into(),
            text: text.into(),
        }
    }

    pub fn done(text: impl Into<String>) -> Self {
        StreamEvent::Done { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StreamEvent::Done { .. })
    }

    /// Tag as it appears on the wire (`raw` for untyped payloads)
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::TextDelta { .. } => "text_delta",
            StreamEvent::ToolCallStarted { .. } => "tool_call_started",
            StreamEvent::ToolCallResult { .. } => "tool_call_result",
            StreamEvent::Usage { .. } => "usage",
            StreamEvent::FinishReason { .. } => "finish_reason",
            StreamEvent::ApprovalRequested { .. } => "approval_requested",
            StreamEvent::StepFinished { .. } => "step_finished",
            StreamEvent::Warning { .. } => "warning",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Raw(_) => "raw",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_delta_tag() {
        let json = serde_json::to_value(StreamEvent::text_delta("lo", "hello")).unwrap();
        assert_eq!(json, json!({"type": "text_delta", "delta": "lo", "text": "hello"}));
    }

    #[test]
    fn test_done_tag() {
        let json = serde_json::to_value(StreamEvent::done("bye")).unwrap();
        assert_eq!(json, json!({"type": "done", "text": "bye"}));
    }

    #[test]
    fn test_step_finished_tag() {
        let event = StreamEvent::StepFinished {
            step: 1,
            tool_calls: vec!["echo".into()],
            input_tokens: 10,
            output_tokens: 5,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "step_finished",
                "step": 1,
                "tool_calls": ["echo"],
                "input_tokens": 10,
                "output_tokens": 5
            })
        );
        assert_eq!(event.event_type(), "step_finished");
    }

    #[test]
    fn test_unknown_tag_passes_through() {
        let payload = json!({"type": "reasoning_delta", "delta": "hmm"});
        let event: StreamEvent = serde_json::from_value(payload.clone()).unwrap();
        assert_eq!(event, StreamEvent::Raw(payload.clone()));
        assert_eq!(serde_json::to_value(&event).unwrap(), payload);
    }
}
