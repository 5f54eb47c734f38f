// JSON-schema validation of model output

use async_trait::async_trait;
use jsonschema::Validator;
use serde_json::Value;

use super::{Guardrail, GuardrailOutcome, GuardrailStage};
use crate::error::{Result, RuntimeError};

/// Blocks output that is not JSON or does not match the schema.
/// Input content always passes.
pub struct SchemaGuardrail {
    id: String,
    validator: Validator,
}

impl SchemaGuardrail {
    pub fn new(schema: &Value) -> Result<Self> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| RuntimeError::configuration(format!("Invalid guardrail schema: {e}")))?;
        Ok(Self {
            id: "json_schema".to_string(),
            validator,
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

impl std::fmt::Debug for SchemaGuardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaGuardrail").field("id", &self.id).finish()
    }
}

#[async_trait]
impl Guardrail for SchemaGuardrail {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&self, stage: GuardrailStage, content: &str) -> GuardrailOutcome {
        if stage == GuardrailStage::Input {
            return GuardrailOutcome::Pass;
        }

        let parsed: Value = match serde_json::from_str(content.trim()) {
            Ok(value) => value,
            Err(e) => return GuardrailOutcome::block(format!("Output is not valid JSON: {e}")),
        };

        match self.validator.validate(&parsed) {
            Ok(()) => GuardrailOutcome::Pass,
            Err(e) => GuardrailOutcome::block(format!("Schema validation failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn guard() -> SchemaGuardrail {
        SchemaGuardrail::new(&json!({
            "type": "object",
            "properties": {"answer": {"type": "string"}},
            "required": ["answer"]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_valid_output_passes() {
        let outcome = guard().check(GuardrailStage::Output, r#"{"answer": "42"}"#).await;
        assert_eq!(outcome, GuardrailOutcome::Pass);
    }

    #[tokio::test]
    async fn test_invalid_output_blocks() {
        let outcome = guard().check(GuardrailStage::Output, r#"{"answer": 42}"#).await;
        assert!(matches!(outcome, GuardrailOutcome::Block { .. }));
        let outcome = guard().check(GuardrailStage::Output, "not json").await;
        assert!(matches!(outcome, GuardrailOutcome::Block { ref reason } if reason.starts_with("Output is not valid JSON")));
    }

    #[tokio::test]
    async fn test_input_is_ignored() {
        let outcome = guard().check(GuardrailStage::Input, "free text").await;
        assert_eq!(outcome, GuardrailOutcome::Pass);
    }
}
