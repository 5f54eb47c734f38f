// Run result types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;

/// Token usage accumulated across the steps of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// The model answered without requesting tools
    #[default]
    Done,
    /// The step budget ran out before a final answer
    StepLimitReached,
    /// A configured stop condition ended the run after a step
    StopConditionMet,
}

/// Terminal artifact of one loop invocation
///
/// Wire shape: `{text, steps, usage:{input_tokens,output_tokens}, structured_output?}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub text: String,
    pub steps: usize,
    pub usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<Value>,
    #[serde(skip)]
    pub terminal_state: TerminalState,
    /// Full history at the end of the run, system message included. Pass it
    /// back to continue the conversation.
    #[serde(skip)]
    pub messages: Vec<Message>,
}

impl AgentResult {
    pub fn hit_step_limit(&self) -> bool {
        self.terminal_state == TerminalState::StepLimitReached
    }

    /// History to continue from, followed by the next user turn
    pub fn continue_with(&self, prompt: impl Into<String>) -> Vec<Message> {
        let mut messages = self.messages.clone();
        messages.push(Message::user(prompt.into()));
        messages
    }
}
