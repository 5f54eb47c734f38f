// Tool Catalogue
//
// Tools are named, schema-described callable units. The execution capability
// is injected at registration time, either as a `Tool` implementation or as a
// closure wrapped in `FnTool`; the loop only ever resolves tools through the
// registry.
//
// Design decisions:
// - Error handling distinguishes between model-visible errors and internal errors
// - Internal errors are logged but not exposed to the model
// - Unknown tools and invalid arguments become observations, never loop failures

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use strand_schemas::{ToolCall, ToolPolicy, ToolResult, ToolSchema};
use tracing::error;

use crate::error::{Result, RuntimeError};
use crate::validation::ToolValidator;

// ============================================================================
// Tool Execution Result - Error Handling Contract
// ============================================================================

/// Result of a tool execution.
///
/// - `Success`: returned to the model as the observation
/// - `ToolError`: expected failure the model should see ("City not found")
/// - `InternalError`: system failure, logged and replaced with a generic message
#[derive(Debug)]
pub enum ToolExecutionResult {
    Success(Value),
    ToolError(String),
    InternalError(String),
}

impl ToolExecutionResult {
    pub fn success(value: impl Into<Value>) -> Self {
        ToolExecutionResult::Success(value.into())
    }

    pub fn tool_error(message: impl Into<String>) -> Self {
        ToolExecutionResult::ToolError(message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        ToolExecutionResult::InternalError(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolExecutionResult::Success(_))
    }

    /// Convert to the ToolResult fed back to the model
    pub fn into_tool_result(self, tool_call_id: &str, tool_name: &str) -> ToolResult {
        match self {
            ToolExecutionResult::Success(value) => ToolResult::success(tool_call_id, tool_name, value),
            ToolExecutionResult::ToolError(message) => {
                ToolResult::error(tool_call_id, tool_name, message)
            }
            ToolExecutionResult::InternalError(message) => {
                error!(
                    tool_name = %tool_name,
                    tool_call_id = %tool_call_id,
                    error = %message,
                    "Tool internal error (details hidden from model)"
                );
                ToolResult::error(
                    tool_call_id,
                    tool_name,
                    "An internal error occurred while executing the tool",
                )
            }
        }
    }
}

// ============================================================================
// Tool Trait - Core Tool Abstraction
// ============================================================================

/// A callable unit the model can invoke by name
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within a registry
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the arguments
    fn parameters_schema(&self) -> Value;

    /// Execute with arguments that already passed validation
    async fn execute(&self, arguments: Value) -> ToolExecutionResult;

    /// Whether a human must approve each call
    fn policy(&self) -> ToolPolicy {
        ToolPolicy::Auto
    }

    fn to_schema(&self) -> ToolSchema {
        ToolSchema::new(self.name(), self.description(), self.parameters_schema())
    }
}

// ============================================================================
// FnTool - Closure-backed tool
// ============================================================================

type ToolFn = dyn Fn(Value) -> BoxFuture<'static, ToolExecutionResult> + Send + Sync;

/// Tool whose execution capability is a caller-supplied async closure
///
/// ```ignore
/// let tool = FnTool::new("add", "Add two numbers", schema, |args| async move {
///     let a = args["a"].as_f64().unwrap_or_default();
///     let b = args["b"].as_f64().unwrap_or_default();
///     ToolExecutionResult::success(json!({ "sum": a + b }))
/// });
/// ```
pub struct FnTool {
    name: String,
    description: String,
    parameters: Value,
    policy: ToolPolicy,
    handler: Arc<ToolFn>,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolExecutionResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            policy: ToolPolicy::Auto,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Mark every call of this tool as requiring human approval
    pub fn requires_approval(mut self) -> Self {
        self.policy = ToolPolicy::RequiresApproval;
        self
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        (self.handler)(arguments).await
    }

    fn policy(&self) -> ToolPolicy {
        self.policy
    }
}

// ============================================================================
// ToolRegistry - Collection of Tools
// ============================================================================

/// A tool resolved from the registry with validated arguments
#[derive(Clone)]
pub struct PreparedCall {
    pub tool: Arc<dyn Tool>,
    pub arguments: Value,
}

/// Named tool catalogue with argument validation
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    validator: ToolValidator,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    pub fn set_validator(&mut self, validator: ToolValidator) {
        self.validator = validator;
    }

    pub fn validator(&self) -> &ToolValidator {
        &self.validator
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool names, sorted
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Schemas sent to the model, sorted by name so requests are deterministic
    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.to_schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Resolve a call and validate its arguments
    pub fn prepare(&self, call: &ToolCall) -> Result<PreparedCall> {
        let tool = self
            .tools
            .get(&call.name)
            .cloned()
            .ok_or_else(|| RuntimeError::ToolNotFound(call.name.clone()))?;
        let arguments = self.validate(tool.as_ref(), call.arguments.clone())?;
        Ok(PreparedCall { tool, arguments })
    }

    /// Validate arguments for an already-resolved tool
    pub fn validate(&self, tool: &dyn Tool, arguments: Value) -> Result<Value> {
        // Backends sometimes send `null` for tools without parameters
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        self.validator
            .validate(tool.name(), arguments, &tool.parameters_schema())
    }

    /// Resolve, validate and execute a call without any approval gate.
    ///
    /// Unknown tools and invalid arguments come back as error observations.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        match self.prepare(call) {
            Ok(prepared) => prepared
                .tool
                .execute(prepared.arguments)
                .await
                .into_tool_result(&call.id, &call.name),
            Err(e) => ToolResult::error(&call.id, &call.name, e.to_string()),
        }
    }

    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .field("validator", &self.validator)
            .finish()
    }
}

/// Builder for fluent tool registration
#[derive(Default)]
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.register(tool);
        self
    }

    pub fn tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.registry.register_arc(tool);
        self
    }

    pub fn validator(mut self, validator: ToolValidator) -> Self {
        self.registry.set_validator(validator);
        self
    }

    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}

// ============================================================================
// Built-in test tools
// ============================================================================

/// Echoes back `message`
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo back the provided message"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "description": "Message to echo" }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let message = arguments.get("message").and_then(Value::as_str).unwrap_or_default();
        ToolExecutionResult::success(json!({ "echo": message }))
    }
}

/// Always fails with a model-visible error
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing_tool"
    }

    fn description(&self) -> &str {
        "A tool that always fails"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        ToolExecutionResult::tool_error("This tool always fails")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_executes_echo() {
        let registry = ToolRegistry::builder().tool(EchoTool).build();
        let result = registry
            .execute(&ToolCall::new("c1", "echo", json!({"message": "hi"})))
            .await;
        assert_eq!(result.result, Some(json!({"echo": "hi"})));
        assert_eq!(result.tool_call_id, "c1");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_observation() {
        let registry = ToolRegistry::new();
        let result = registry.execute(&ToolCall::new("c1", "nope", json!({}))).await;
        assert_eq!(result.error.as_deref(), Some("Tool 'nope' not found"));
    }

    #[tokio::test]
    async fn test_invalid_args_are_observation() {
        let registry = ToolRegistry::builder().tool(EchoTool).build();
        let result = registry.execute(&ToolCall::new("c1", "echo", json!({}))).await;
        assert!(result.error.unwrap().starts_with("Invalid arguments for tool 'echo'"));
    }

    #[tokio::test]
    async fn test_tool_error_is_visible() {
        let registry = ToolRegistry::builder().tool(FailingTool).build();
        let result = registry.execute(&ToolCall::new("c1", "failing_tool", json!(null))).await;
        assert_eq!(result.error.as_deref(), Some("This tool always fails"));
    }

    #[tokio::test]
    async fn test_internal_error_is_hidden() {
        let tool = FnTool::new("db", "query", json!({"type": "object"}), |_| async {
            ToolExecutionResult::internal_error("password=hunter2 rejected")
        });
        let registry = ToolRegistry::builder().tool(tool).build();
        let result = registry.execute(&ToolCall::new("c1", "db", json!({}))).await;
        let error = result.error.unwrap();
        assert!(!error.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_fn_tool_closure_and_policy() {
        let tool = FnTool::new(
            "add",
            "Add numbers",
            json!({
                "type": "object",
                "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                "required": ["a", "b"]
            }),
            |args| async move {
                let sum = args["a"].as_f64().unwrap_or_default() + args["b"].as_f64().unwrap_or_default();
                ToolExecutionResult::success(json!({ "sum": sum }))
            },
        )
        .requires_approval();
        assert_eq!(tool.policy(), ToolPolicy::RequiresApproval);

        let registry = ToolRegistry::builder().tool(tool).build();
        let result = registry
            .execute(&ToolCall::new("c1", "add", json!({"a": 2, "b": 3})))
            .await;
        assert_eq!(result.result, Some(json!({"sum": 5.0})));
    }

    #[test]
    fn test_schemas_sorted_by_name() {
        let registry = ToolRegistry::builder().tool(FailingTool).tool(EchoTool).build();
        let names: Vec<String> = registry.tool_schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["echo", "failing_tool"]);
        assert_eq!(registry.tool_names(), vec!["echo", "failing_tool"]);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(EchoTool);
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister("echo").is_some());
        assert!(registry.is_empty());
    }
}
