// Memory recall tool
//
// Exposes vector search to the model as an ordinary catalogue tool, plus a
// helper that embeds and stores text for later recall.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use strand_core::{Tool, ToolExecutionResult};
use strand_schemas::VectorRecord;
use tracing::{debug, error};

use crate::embedder::Embedder;
use crate::error::{Result, StoreError};
use crate::store::VectorStore;

const DEFAULT_TOP_K: usize = 5;

/// Searches long-term memory for entries similar to a query
#[derive(Clone)]
pub struct MemoryRecallTool {
    name: String,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    default_top_k: usize,
}

impl MemoryRecallTool {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            name: "memory_recall".to_string(),
            store,
            embedder,
            default_top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k.max(1);
        self
    }

    /// Embed `entries` (id, text, metadata) and store them. The text is kept
    /// in the metadata under `"text"`.
    pub async fn remember(&self, entries: Vec<(String, String, Value)>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = entries.iter().map(|(_, text, _)| text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != entries.len() {
            return Err(StoreError::Embedding(format!(
                "expected {} embeddings, got {}",
                entries.len(),
                embeddings.len()
            )));
        }

        let records: Vec<VectorRecord> = entries
            .into_iter()
            .zip(embeddings)
            .map(|((id, text, metadata), embedding)| {
                let metadata = match metadata {
                    Value::Object(mut map) => {
                        map.insert("text".to_string(), Value::String(text));
                        Value::Object(map)
                    }
                    _ => json!({ "text": text }),
                };
                VectorRecord::new(id, embedding, metadata)
            })
            .collect();
        let count = records.len();
        self.store.upsert(records).await?;
        Ok(count)
    }
}

impl std::fmt::Debug for MemoryRecallTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRecallTool")
            .field("name", &self.name)
            .field("default_top_k", &self.default_top_k)
            .finish()
    }
}

#[async_trait]
impl Tool for MemoryRecallTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Search long-term memory for entries related to a query"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for" },
                "top_k": { "type": "integer", "minimum": 1, "description": "Maximum results" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let query = arguments.get("query").and_then(Value::as_str).unwrap_or_default();
        if query.trim().is_empty() {
            return ToolExecutionResult::tool_error("query must not be empty");
        }
        let top_k = arguments
            .get("top_k")
            .and_then(Value::as_u64)
            .map_or(self.default_top_k, |k| k as usize);

        let embedding = match self.embedder.embed_one(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                error!(error = %e, "Failed to embed recall query");
                return ToolExecutionResult::internal_error(e.to_string());
            }
        };

        match self.store.search(&embedding, top_k).await {
            Ok(hits) => {
                debug!(query = %query, hits = hits.len(), "Memory recall");
                ToolExecutionResult::success(json!({ "results": hits }))
            }
            Err(e) => ToolExecutionResult::tool_error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryVectorStore;

    /// Counts a fixed vocabulary; enough to make similarity meaningful
    struct VocabularyEmbedder;

    const VOCABULARY: [&str; 4] = ["rust", "python", "coffee", "tea"];

    #[async_trait]
    impl Embedder for VocabularyEmbedder {
        fn dimension(&self) -> usize {
            VOCABULARY.len()
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let lowered = text.to_lowercase();
                    VOCABULARY
                        .iter()
                        .map(|word| lowered.matches(word).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    fn recall_tool() -> MemoryRecallTool {
        MemoryRecallTool::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(VocabularyEmbedder),
        )
    }

    #[tokio::test]
    async fn test_remember_then_recall() {
        let tool = recall_tool();
        let stored = tool
            .remember(vec![
                ("m1".into(), "User writes Rust every day".into(), json!({"source": "chat"})),
                ("m2".into(), "User drinks tea, never coffee".into(), Value::Null),
            ])
            .await
            .unwrap();
        assert_eq!(stored, 2);

        let result = tool.execute(json!({"query": "rust", "top_k": 1})).await;
        let value = match result {
            ToolExecutionResult::Success(value) => value,
            other => panic!("recall failed: {other:?}"),
        };
        let results = value["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["id"], "m1");
        assert_eq!(results[0]["metadata"]["source"], "chat");
        assert_eq!(results[0]["metadata"]["text"], "User writes Rust every day");
    }

    #[tokio::test]
    async fn test_empty_query_is_a_tool_error() {
        let result = recall_tool().execute(json!({"query": "  "})).await;
        assert!(matches!(result, ToolExecutionResult::ToolError(_)));
    }

    #[test]
    fn test_schema_requires_query() {
        let schema = recall_tool().to_schema();
        assert_eq!(schema.name, "memory_recall");
        assert_eq!(schema.parameters["required"], json!(["query"]));
    }
}
