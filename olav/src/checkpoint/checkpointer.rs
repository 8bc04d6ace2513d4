//! Checkpointer trait and CheckpointError.

use async_trait::async_trait;

use crate::checkpoint::Checkpoint;

/// Error type for checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
    /// The stored blob was written by an incompatible layout version.
    #[error("incompatible checkpoint schema: found v{found}, expected v{expected}")]
    IncompatibleSchema { found: u32, expected: u32 },
}

/// Saves and loads per-thread checkpoints; latest version wins.
///
/// Implementations must make `put` atomic per thread: version assignment and the
/// write happen together, so concurrent readers see either the previous or the
/// new latest checkpoint. Different threads may write concurrently.
///
/// **Interaction**: Injected via `WorkflowGraph::compile_with_checkpointer`; the
/// run loop calls `put` after every node and the dispatcher calls `latest` on
/// resume.
#[async_trait]
pub trait Checkpointer<S>: Send + Sync
where
    S: Clone + Send + Sync + 'static,
{
    /// Persists a checkpoint, assigning the next version. Returns the version.
    async fn put(&self, thread_id: &str, checkpoint: &Checkpoint<S>)
        -> Result<u64, CheckpointError>;

    /// Loads the highest-version checkpoint for the thread.
    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>, CheckpointError>;

    /// Drops all but the newest `keep_latest` checkpoints for the thread.
    /// `keep_latest == 0` removes the thread's history entirely (terminal threads).
    async fn prune(&self, thread_id: &str, keep_latest: usize) -> Result<(), CheckpointError>;
}
