// Pattern-based content moderation

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use super::{Guardrail, GuardrailOutcome, GuardrailStage};
use crate::error::{Result, RuntimeError};

/// Blocks or warns when content matches configured patterns (case-insensitive)
#[derive(Debug, Clone)]
pub struct ContentModeration {
    id: String,
    block: Vec<Regex>,
    warn: Vec<Regex>,
}

impl ContentModeration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            block: Vec::new(),
            warn: Vec::new(),
        }
    }

    pub fn block_pattern(mut self, pattern: &str) -> Result<Self> {
        self.block.push(compile(pattern)?);
        Ok(self)
    }

    pub fn warn_pattern(mut self, pattern: &str) -> Result<Self> {
        self.warn.push(compile(pattern)?);
        Ok(self)
    }

    /// Convenience for plain word lists; words are matched literally
    pub fn block_words<I, S>(mut self, words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for word in words {
            self.block.push(compile(&regex::escape(word.as_ref()))?);
        }
        Ok(self)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| RuntimeError::configuration(format!("Invalid moderation pattern '{pattern}': {e}")))
}

#[async_trait]
impl Guardrail for ContentModeration {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&self, _stage: GuardrailStage, content: &str) -> GuardrailOutcome {
        if let Some(pattern) = self.block.iter().find(|p| p.is_match(content)) {
            return GuardrailOutcome::block(format!("Content matched blocked pattern '{}'", pattern.as_str()));
        }
        if let Some(pattern) = self.warn.iter().find(|p| p.is_match(content)) {
            return GuardrailOutcome::warn(format!("Content matched warning pattern '{}'", pattern.as_str()));
        }
        GuardrailOutcome::Pass
    }
}
