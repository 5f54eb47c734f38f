// Regex rule filter

use async_trait::async_trait;
use regex::Regex;

use super::{Guardrail, GuardrailOutcome, GuardrailStage};
use crate::error::{Result, RuntimeError};

/// What a matching rule does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegexRuleAction {
    Block,
    Warn,
    /// Replace every match with the given text (a redaction)
    Rewrite(String),
}

#[derive(Debug, Clone)]
struct RegexRule {
    pattern: Regex,
    action: RegexRuleAction,
}

/// Ordered block/warn/rewrite rules
///
/// Every matching rule contributes: any block wins, rewrites are applied in
/// rule order, warnings are reported when nothing stronger matched.
#[derive(Debug, Clone)]
pub struct RegexFilter {
    id: String,
    rules: Vec<RegexRule>,
}

impl RegexFilter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rules: Vec::new(),
        }
    }

    pub fn rule(mut self, pattern: &str, action: RegexRuleAction) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| RuntimeError::configuration(format!("Invalid filter pattern '{pattern}': {e}")))?;
        self.rules.push(RegexRule { pattern, action });
        Ok(self)
    }

    pub fn block(self, pattern: &str) -> Result<Self> {
        self.rule(pattern, RegexRuleAction::Block)
    }

    pub fn warn(self, pattern: &str) -> Result<Self> {
        self.rule(pattern, RegexRuleAction::Warn)
    }

    pub fn rewrite(self, pattern: &str, replacement: impl Into<String>) -> Result<Self> {
        self.rule(pattern, RegexRuleAction::Rewrite(replacement.into()))
    }
}

#[async_trait]
impl Guardrail for RegexFilter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&self, _stage: GuardrailStage, content: &str) -> GuardrailOutcome {
        let mut rewritten = content.to_string();
        let mut rewrites = Vec::new();
        let mut warnings = Vec::new();

        for rule in &self.rules {
            if !rule.pattern.is_match(&rewritten) {
                continue;
            }
            match &rule.action {
                RegexRuleAction::Block => {
                    return GuardrailOutcome::block(format!("Matched block rule '{}'", rule.pattern.as_str()));
                }
                RegexRuleAction::Warn => warnings.push(rule.pattern.as_str()),
                RegexRuleAction::Rewrite(replacement) => {
                    rewritten = rule
                        .pattern
                        .replace_all(&rewritten, replacement.as_str())
                        .into_owned();
                    rewrites.push(rule.pattern.as_str());
                }
            }
        }

        if !rewrites.is_empty() {
            return GuardrailOutcome::Redact {
                content: rewritten,
                reason: format!("Rewrote matches of {}", rewrites.join(", ")),
            };
        }
        if !warnings.is_empty() {
            return GuardrailOutcome::warn(format!("Matched warn rules {}", warnings.join(", ")));
        }
        GuardrailOutcome::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_block_rule() {
        let filter = RegexFilter::new("filter").block(r"(?i)drop\s+table").unwrap();
        let outcome = filter.check(GuardrailStage::Input, "DROP TABLE users").await;
        assert!(matches!(outcome, GuardrailOutcome::Block { .. }));
    }

    #[tokio::test]
    async fn test_rewrite_is_redaction() {
        let filter = RegexFilter::new("filter")
            .rewrite(r"sk-[A-Za-z0-9]+", "[KEY]")
            .unwrap()
            .warn("secret")
            .unwrap();
        let outcome = filter
            .check(GuardrailStage::Output, "secret key sk-abc123")
            .await;
        assert!(matches!(outcome, GuardrailOutcome::Redact { ref content, .. } if content == "secret key [KEY]"));
    }

    #[tokio::test]
    async fn test_warn_only() {
        let filter = RegexFilter::new("filter").warn("maybe").unwrap();
        let outcome = filter.check(GuardrailStage::Output, "maybe later").await;
        assert!(matches!(outcome, GuardrailOutcome::Warn { .. }));
    }
}
