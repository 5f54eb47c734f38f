// Token-limit enforcement

use async_trait::async_trait;

use super::{Guardrail, GuardrailOutcome, GuardrailStage};

/// Approximate token count: one token per four characters, rounded up
pub fn approx_token_count(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Blocks content whose approximate token count exceeds the stage limit
#[derive(Debug, Clone, Default)]
pub struct TokenLimit {
    max_input: Option<usize>,
    max_output: Option<usize>,
}

impl TokenLimit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_input(mut self, tokens: usize) -> Self {
        self.max_input = Some(tokens);
        self
    }

    pub fn max_output(mut self, tokens: usize) -> Self {
        self.max_output = Some(tokens);
        self
    }
}

#[async_trait]
impl Guardrail for TokenLimit {
    fn id(&self) -> &str {
        "token_limit"
    }

    async fn check(&self, stage: GuardrailStage, content: &str) -> GuardrailOutcome {
        let (limit, label) = match stage {
            GuardrailStage::Input => (self.max_input, "Input"),
            GuardrailStage::Output => (self.max_output, "Output"),
        };
        let Some(max) = limit else {
            return GuardrailOutcome::Pass;
        };

        let total = approx_token_count(content);
        if total > max {
            GuardrailOutcome::block(format!("{label} exceeds token limit: {total} > {max}"))
        } else {
            GuardrailOutcome::Pass
        }
    }
}
