// Strand Storage
//
// Decision: Vector memory is independent of the loop; it reaches the model only as a catalogue tool
// Decision: Cosine similarity is a free function so callers can rank vectors without a store

pub mod embedder;
pub mod error;
pub mod recall;
pub mod similarity;
pub mod store;

pub use embedder::Embedder;
pub use error::{Result, StoreError};
pub use recall::MemoryRecallTool;
pub use similarity::cosine_similarity;
pub use store::{InMemoryVectorStore, VectorStore};
