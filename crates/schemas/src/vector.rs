// Vector memory types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored embedding. Upserting the same id replaces the prior record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Value,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>, metadata: Value) -> Self {
        Self {
            id: id.into(),
            embedding,
            metadata,
        }
    }
}

/// One search result, ranked by cosine similarity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub metadata: Value,
}
