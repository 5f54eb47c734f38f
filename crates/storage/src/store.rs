// In-memory vector store
//
// Records are kept behind a single RwLock. Searches take the read guard and
// score a consistent snapshot; a batch upsert validates every record first and
// then applies the whole batch under one write guard, so readers never see a
// partial batch or a half-replaced record.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use strand_schemas::{SearchHit, VectorRecord};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::similarity::cosine_similarity;

/// Similarity index over embedded records
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records by id
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// `top_k` records by descending cosine similarity; ties go to the most
    /// recently upserted record
    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>>;

    /// Remove records by id, returning how many existed
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    async fn len(&self) -> usize;
}

#[derive(Debug)]
struct StoredRecord {
    record: VectorRecord,
    // upsert sequence, for recency tie-breaks
    seq: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<String, StoredRecord>,
    next_seq: u64,
    dimension: Option<usize>,
}

/// Vector store kept in process memory
///
/// The dimension is fixed by `with_dimension` or by the first upsert.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    state: RwLock<StoreState>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            state: RwLock::new(StoreState {
                dimension: Some(dimension),
                ..StoreState::default()
            }),
        }
    }

    pub fn dimension(&self) -> Option<usize> {
        self.state.read().dimension
    }

    pub fn get(&self, id: &str) -> Option<VectorRecord> {
        self.state.read().records.get(id).map(|s| s.record.clone())
    }
}

fn check_dimensions(records: &[VectorRecord], fixed: Option<usize>) -> Result<Option<usize>> {
    let mut expected = fixed;
    for record in records {
        if record.embedding.is_empty() {
            return Err(StoreError::EmptyEmbedding(record.id.clone()));
        }
        match expected {
            Some(dimension) if dimension != record.embedding.len() => {
                return Err(StoreError::DimensionMismatch {
                    id: record.id.clone(),
                    expected: dimension,
                    actual: record.embedding.len(),
                });
            }
            Some(_) => {}
            None => expected = Some(record.embedding.len()),
        }
    }
    Ok(expected)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write();
        state.dimension = check_dimensions(&records, state.dimension)?;

        let count = records.len();
        for record in records {
            let seq = state.next_seq;
            state.next_seq += 1;
            state
                .records
                .insert(record.id.clone(), StoredRecord { record, seq });
        }
        debug!(count, total = state.records.len(), "Upserted vector records");
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read();
        if let Some(dimension) = state.dimension {
            if dimension != query.len() {
                return Err(StoreError::DimensionMismatch {
                    id: "<query>".to_string(),
                    expected: dimension,
                    actual: query.len(),
                });
            }
        }

        let mut scored: Vec<(f32, u64, &VectorRecord)> = state
            .records
            .values()
            .map(|stored| {
                (
                    cosine_similarity(query, &stored.record.embedding),
                    stored.seq,
                    &stored.record,
                )
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, _, record)| SearchHit {
                id: record.id.clone(),
                score,
                metadata: record.metadata.clone(),
            })
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut state = self.state.write();
        Ok(ids
            .iter()
            .filter(|id| state.records.remove(id.as_str()).is_some())
            .count())
    }

    async fn len(&self) -> usize {
        self.state.read().records.len()
    }
}
