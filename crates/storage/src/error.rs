// Vector memory errors

use strand_core::RuntimeError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Embedding for '{id}' has {actual} dimensions, store expects {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Embedding for '{0}' is empty")]
    EmptyEmbedding(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for RuntimeError {
    fn from(error: StoreError) -> Self {
        RuntimeError::Internal(error.into())
    }
}
