// Collaborator traits for the execution loop
//
// Decision: The loop only knows these traits; where events go and where
// checkpoints live is decided by the caller.

use async_trait::async_trait;
use strand_schemas::{Checkpoint, StreamEvent};

use crate::error::Result;

// ============================================================================
// EventEmitter - Where loop events go
// ============================================================================

/// Sink for events produced during a run
///
/// An `Err` from `emit` stops the run (e.g. the stream consumer went away).
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn emit(&self, event: StreamEvent) -> Result<()>;

    async fn emit_batch(&self, events: Vec<StreamEvent>) -> Result<()> {
        for event in events {
            self.emit(event).await?;
        }
        Ok(())
    }
}

/// Emitter that drops everything. Used by synchronous runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventEmitter;

#[async_trait]
impl EventEmitter for NoopEventEmitter {
    async fn emit(&self, _event: StreamEvent) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// CheckpointStore - Durable loop snapshots
// ============================================================================

/// Storage for loop snapshots
///
/// `save` of an existing id overwrites it. `load` of a missing id is
/// `RuntimeError::CheckpointNotFound`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;

    async fn load(&self, id: &str) -> Result<Checkpoint>;

    /// Checkpoints for one agent, oldest first
    async fn list(&self, agent_name: &str) -> Result<Vec<Checkpoint>>;

    /// Returns whether a checkpoint was removed
    async fn delete(&self, id: &str) -> Result<bool>;
}
