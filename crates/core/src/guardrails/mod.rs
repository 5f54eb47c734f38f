// Guardrail Pipeline
//
// An ordered, mutable list of independent content checks. Running the pipeline
// evaluates every guardrail in registration order and merges the verdicts with
// the precedence block > redact > warn > pass. A redaction replaces the
// content seen by the guardrails that run after it.

mod moderation;
mod pii;
mod regex_filter;
mod schema;
mod token_limit;

pub use moderation::ContentModeration;
pub use pii::{PiiAction, PiiDetection, PiiKind};
pub use regex_filter::{RegexFilter, RegexRuleAction};
pub use schema::SchemaGuardrail;
pub use token_limit::{approx_token_count, TokenLimit};

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, RuntimeError};

/// Where the pipeline is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStage {
    /// Inbound request content
    Input,
    /// Model response content
    Output,
}

/// Decision of a single guardrail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailOutcome {
    Pass,
    Warn { reason: String },
    Redact { content: String, reason: String },
    Block { reason: String },
}

impl GuardrailOutcome {
    pub fn warn(reason: impl Into<String>) -> Self {
        GuardrailOutcome::Warn {
            reason: reason.into(),
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        GuardrailOutcome::Block {
            reason: reason.into(),
        }
    }

    pub fn action(&self) -> GuardrailAction {
        match self {
            GuardrailOutcome::Pass => GuardrailAction::Pass,
            GuardrailOutcome::Warn { .. } => GuardrailAction::Warn,
            GuardrailOutcome::Redact { .. } => GuardrailAction::Redact,
            GuardrailOutcome::Block { .. } => GuardrailAction::Block,
        }
    }
}

/// Verdict kinds, ordered by merge precedence (Pass lowest, Block highest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailAction {
    Pass,
    Warn,
    Redact,
    Block,
}

/// One guardrail's verdict within a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    pub guardrail: String,
    pub outcome: GuardrailAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_content: Option<String>,
}

/// An independent content check
#[async_trait]
pub trait Guardrail: Send + Sync {
    /// Identifier used for listing, removal and reporting
    fn id(&self) -> &str;

    async fn check(&self, stage: GuardrailStage, content: &str) -> GuardrailOutcome;
}

/// Merged result of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailReport {
    /// Highest-precedence outcome across all verdicts
    pub action: GuardrailAction,
    /// Content to continue with: redacted if any guardrail redacted
    pub content: String,
    pub verdicts: Vec<GuardrailVerdict>,
}

impl GuardrailReport {
    pub fn is_blocked(&self) -> bool {
        self.action == GuardrailAction::Block
    }

    pub fn verdicts_with(&self, action: GuardrailAction) -> impl Iterator<Item = &GuardrailVerdict> {
        self.verdicts.iter().filter(move |v| v.outcome == action)
    }

    /// Warn verdicts, reported alongside pass-through content
    pub fn warnings(&self) -> Vec<&GuardrailVerdict> {
        self.verdicts_with(GuardrailAction::Warn).collect()
    }

    /// `GuardrailBlocked` naming the first blocking guardrail, if any blocked
    pub fn block_error(&self) -> Option<RuntimeError> {
        self.verdicts_with(GuardrailAction::Block)
            .next()
            .map(|v| RuntimeError::GuardrailBlocked {
                guardrail: v.guardrail.clone(),
                reason: v.reason.clone().unwrap_or_default(),
            })
    }

    /// Content to continue with, or the block error
    pub fn into_content(self) -> Result<String> {
        match self.block_error() {
            Some(err) => Err(err),
            None => Ok(self.content),
        }
    }
}

/// Ordered guardrail chain
///
/// Mutation takes `&self` so a pipeline shared by running agents can be
/// reconfigured; each run evaluates a snapshot of the list.
#[derive(Default)]
pub struct GuardrailPipeline {
    guardrails: RwLock<Vec<Arc<dyn Guardrail>>>,
}

impl GuardrailPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, guardrail: impl Guardrail + 'static) -> Self {
        self.add(guardrail);
        self
    }

    /// Append a guardrail. An existing guardrail with the same id is replaced in place.
    pub fn add(&self, guardrail: impl Guardrail + 'static) {
        self.add_arc(Arc::new(guardrail));
    }

    pub fn add_arc(&self, guardrail: Arc<dyn Guardrail>) {
        let mut guardrails = self.guardrails.write();
        match guardrails.iter().position(|g| g.id() == guardrail.id()) {
            Some(index) => guardrails[index] = guardrail,
            None => guardrails.push(guardrail),
        }
    }

    /// Remove by id. Returns whether anything was removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut guardrails = self.guardrails.write();
        let before = guardrails.len();
        guardrails.retain(|g| g.id() != id);
        guardrails.len() != before
    }

    /// Active guardrail ids in evaluation order
    pub fn list(&self) -> Vec<String> {
        self.guardrails.read().iter().map(|g| g.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.guardrails.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guardrails.read().is_empty()
    }

    /// Evaluate every guardrail against `content` and merge the verdicts
    pub async fn run(&self, stage: GuardrailStage, content: &str) -> GuardrailReport {
        let snapshot: Vec<Arc<dyn Guardrail>> = self.guardrails.read().clone();

        let mut current = content.to_string();
        let mut action = GuardrailAction::Pass;
        let mut verdicts = Vec::with_capacity(snapshot.len());

        for guardrail in snapshot {
            let outcome = guardrail.check(stage, &current).await;
            action = action.max(outcome.action());

            let verdict = match outcome {
                GuardrailOutcome::Pass => GuardrailVerdict {
                    guardrail: guardrail.id().to_string(),
                    outcome: GuardrailAction::Pass,
                    reason: None,
                    modified_content: None,
                },
                GuardrailOutcome::Warn { reason } => {
                    debug!(guardrail = %guardrail.id(), ?stage, %reason, "Guardrail warning");
                    GuardrailVerdict {
                        guardrail: guardrail.id().to_string(),
                        outcome: GuardrailAction::Warn,
                        reason: Some(reason),
                        modified_content: None,
                    }
                }
                GuardrailOutcome::Redact { content, reason } => {
                    current = content.clone();
                    GuardrailVerdict {
                        guardrail: guardrail.id().to_string(),
                        outcome: GuardrailAction::Redact,
                        reason: Some(reason),
                        modified_content: Some(content),
                    }
                }
                GuardrailOutcome::Block { reason } => {
                    warn!(guardrail = %guardrail.id(), ?stage, %reason, "Guardrail blocked content");
                    GuardrailVerdict {
                        guardrail: guardrail.id().to_string(),
                        outcome: GuardrailAction::Block,
                        reason: Some(reason),
                        modified_content: None,
                    }
                }
            };
            verdicts.push(verdict);
        }

        GuardrailReport {
            action,
            content: current,
            verdicts,
        }
    }

    /// Run and fail with `GuardrailBlocked` if any guardrail blocked
    pub async fn enforce(&self, stage: GuardrailStage, content: &str) -> Result<GuardrailReport> {
        let report = self.run(stage, content).await;
        match report.block_error() {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

impl std::fmt::Debug for GuardrailPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardrailPipeline")
            .field("guardrails", &self.list())
            .finish()
    }
}
