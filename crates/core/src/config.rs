// Agent configuration for the loop
//
// AgentConfig can be:
// - Created directly with `new` and the `with_*` methods
// - Deserialized from JSON/TOML (every optional field has a serde default)
// - Overridden from the environment via `apply_env`

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strand_schemas::ToolCall;

use crate::error::{Result, RuntimeError};

/// Condition checked after each step's tool results; the first one met ends
/// the run with `TerminalState::StopConditionMet`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCondition {
    /// Stop once this many steps have run (tighter than `max_steps`, and not
    /// reported as a step-limit hit)
    MaxSteps(usize),
    /// Stop after a step that called this tool
    HasToolCall(String),
    /// Stop after a step whose assistant message carried text alongside its
    /// tool calls
    TextGenerated,
}

impl StopCondition {
    pub fn is_met(&self, step: usize, text: &str, tool_calls: &[ToolCall]) -> bool {
        match self {
            StopCondition::MaxSteps(max) => step >= *max,
            StopCondition::HasToolCall(name) => tool_calls.iter().any(|call| &call.name == name),
            StopCondition::TextGenerated => !text.trim().is_empty(),
        }
    }
}

/// Configuration for one agent's execution loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent name (used for checkpoints, logs and the network registry)
    pub name: String,

    /// System instructions; empty means no system message
    #[serde(default)]
    pub instructions: String,

    /// Model identifier passed to the backend
    #[serde(default)]
    pub model: Option<String>,

    /// Step budget (prevents infinite loops)
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Temperature for sampling (0.0 - 2.0)
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate per response
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// JSON schema the final answer must satisfy
    #[serde(default)]
    pub output_schema: Option<Value>,

    /// Run the tool calls of one step concurrently
    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,

    /// How long a step waits for a human decision before treating the call
    /// as denied (the request itself stays pending). `None` waits forever.
    #[serde(default, with = "optional_duration_millis")]
    pub approval_timeout: Option<Duration>,

    /// Fail the whole run when an approval is denied instead of reporting
    /// the denial to the model
    #[serde(default)]
    pub deny_aborts_run: bool,

    /// Save a checkpoint after every step when a store is configured
    #[serde(default = "default_true")]
    pub checkpoint_every_step: bool,

    /// Early-exit conditions, checked in order after each tool step
    #[serde(default)]
    pub stop_conditions: Vec<StopCondition>,
}

fn default_max_steps() -> usize {
    10
}

fn default_true() -> bool {
    true
}

impl AgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: String::new(),
            model: None,
            max_steps: default_max_steps(),
            temperature: None,
            max_tokens: None,
            output_schema: None,
            parallel_tool_calls: true,
            approval_timeout: None,
            deny_aborts_run: false,
            checkpoint_every_step: true,
            stop_conditions: Vec::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = parallel;
        self
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = Some(timeout);
        self
    }

    pub fn with_deny_aborts_run(mut self, abort: bool) -> Self {
        self.deny_aborts_run = abort;
        self
    }

    pub fn with_checkpoint_every_step(mut self, enabled: bool) -> Self {
        self.checkpoint_every_step = enabled;
        self
    }

    pub fn stop_when(mut self, condition: StopCondition) -> Self {
        self.stop_conditions.push(condition);
        self
    }

    /// Defaults for `name` with environment overrides applied
    pub fn from_env(name: impl Into<String>) -> Result<Self> {
        Self::new(name).apply_env()
    }

    /// Apply `STRAND_MODEL` and `STRAND_MAX_STEPS` overrides
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(model) = std::env::var("STRAND_MODEL") {
            self.model = Some(model);
        }
        if let Ok(steps) = std::env::var("STRAND_MAX_STEPS") {
            self.max_steps = steps
                .parse()
                .map_err(|e| RuntimeError::configuration(format!("STRAND_MAX_STEPS: {e}")))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RuntimeError::configuration("agent name must not be empty"));
        }
        if self.max_steps == 0 {
            return Err(RuntimeError::configuration("max_steps must be at least 1"));
        }
        if self.stop_conditions.contains(&StopCondition::MaxSteps(0)) {
            return Err(RuntimeError::configuration("stop condition max_steps must be at least 1"));
        }
        if let Some(schema) = &self.output_schema {
            jsonschema::validator_for(schema)
                .map_err(|e| RuntimeError::configuration(format!("invalid output_schema: {e}")))?;
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new("agent")
    }
}

/// Serde support for Option<Duration> as milliseconds
mod optional_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
