// Tool types
//
// Wire contracts for the tool catalogue: the schema a model sees, the call a
// model emits, and the result the loop feeds back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool execution policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPolicy {
    /// Execute without asking
    #[default]
    Auto,
    /// Suspend the step until a human approves or denies the call
    RequiresApproval,
}

/// Tool schema exchanged with the model backend: `{name, description, parameters}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-Schema-shaped object describing the arguments
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A tool call requested by the model
///
/// Accepts both `{tool, args}` and `{name, arguments}` on the way in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Backend-assigned call id. Backends that do not assign one get an empty id.
    #[serde(default)]
    pub id: String,
    #[serde(alias = "tool")]
    pub name: String,
    #[serde(rename = "args", alias = "arguments", default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Result of one tool call, fed back to the model as a tool message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Observation-level error (unknown tool, invalid arguments, denied approval)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, tool_name: impl Into<String>, value: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result: Some(value),
            error: None,
        }
    }

    pub fn error(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Observation payload the model sees
    pub fn observation(&self) -> Value {
        match (&self.result, &self.error) {
            (_, Some(error)) => serde_json::json!({ "error": error }),
            (Some(value), None) => value.clone(),
            (None, None) => Value::Null,
        }
    }
}
