//! Checkpoint type: one persisted per-thread state snapshot.

use chrono::{DateTime, Utc};

/// Version of the serialized checkpoint envelope. Bumped on incompatible layout
/// changes so old blobs fail fast on load.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// One checkpoint: the state to restore plus the node to run when resuming.
///
/// `version` is assigned by the saver on `put` (monotonically increasing per
/// thread); a freshly built checkpoint carries 0 until stored.
///
/// **Interaction**: Produced by the `CompiledWorkflow` run loop after each node;
/// consumed by `Checkpointer::put` and returned by `latest`.
#[derive(Debug, Clone)]
pub struct Checkpoint<S> {
    /// Monotone per-thread version; the largest version is the resumption point.
    pub version: u64,
    /// Node id to run when resuming, or `END` when the run finished.
    pub current_node: String,
    /// The workflow state at this point.
    pub state: S,
    /// Tool call ids awaiting a human decision, when the thread is interrupted.
    pub pending_call_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl<S> Checkpoint<S> {
    /// Builds an unstored checkpoint for the given resumption node.
    pub fn new(current_node: impl Into<String>, state: S) -> Self {
        Self {
            version: 0,
            current_node: current_node.into(),
            state,
            pending_call_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Attaches the pending call ids of an interrupt.
    pub fn with_pending(mut self, call_ids: Vec<String>) -> Self {
        self.pending_call_ids = call_ids;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: A fresh checkpoint is unversioned and carries no pending calls.
    #[test]
    fn fresh_checkpoint_defaults() {
        let cp = Checkpoint::new("plan", 42i32);
        assert_eq!(cp.version, 0);
        assert_eq!(cp.current_node, "plan");
        assert!(cp.pending_call_ids.is_empty());
        let cp = cp.with_pending(vec!["c1".into()]);
        assert_eq!(cp.pending_call_ids, vec!["c1"]);
    }
}
