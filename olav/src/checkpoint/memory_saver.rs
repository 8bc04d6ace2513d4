//! In-memory checkpointer. Not persistent; for tests and ephemeral deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::checkpoint::{Checkpoint, CheckpointError, Checkpointer};

/// In-memory checkpointer. Key: thread_id; each thread holds its checkpoint
/// history newest-last. Version assignment and insertion happen under one write
/// lock, which gives the required per-thread atomicity.
///
/// **Interaction**: Used as `Arc<dyn Checkpointer<S>>` in
/// `WorkflowGraph::compile_with_checkpointer`.
pub struct MemorySaver<S> {
    inner: Arc<RwLock<HashMap<String, Vec<Checkpoint<S>>>>>,
}

impl<S> MemorySaver<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<S> Default for MemorySaver<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S> Checkpointer<S> for MemorySaver<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn put(
        &self,
        thread_id: &str,
        checkpoint: &Checkpoint<S>,
    ) -> Result<u64, CheckpointError> {
        let mut guard = self.inner.write().await;
        let history = guard.entry(thread_id.to_string()).or_default();
        let version = history.last().map(|c| c.version).unwrap_or(0) + 1;
        let mut stored = checkpoint.clone();
        stored.version = version;
        history.push(stored);
        Ok(version)
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>, CheckpointError> {
        let guard = self.inner.read().await;
        Ok(guard.get(thread_id).and_then(|h| h.last().cloned()))
    }

    async fn prune(&self, thread_id: &str, keep_latest: usize) -> Result<(), CheckpointError> {
        let mut guard = self.inner.write().await;
        if keep_latest == 0 {
            guard.remove(thread_id);
            return Ok(());
        }
        if let Some(history) = guard.get_mut(thread_id) {
            let drop_count = history.len().saturating_sub(keep_latest);
            history.drain(..drop_count);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Versions increase monotonically and latest returns the newest.
    #[tokio::test]
    async fn put_assigns_monotone_versions() {
        let saver = MemorySaver::<i32>::new();
        let v1 = saver.put("t1", &Checkpoint::new("a", 1)).await.unwrap();
        let v2 = saver.put("t1", &Checkpoint::new("b", 2)).await.unwrap();
        assert_eq!((v1, v2), (1, 2));
        let latest = saver.latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.state, 2);
        assert_eq!(latest.current_node, "b");
    }

    /// **Scenario**: Threads have independent version sequences.
    #[tokio::test]
    async fn threads_are_independent() {
        let saver = MemorySaver::<i32>::new();
        saver.put("t1", &Checkpoint::new("a", 1)).await.unwrap();
        let v = saver.put("t2", &Checkpoint::new("a", 9)).await.unwrap();
        assert_eq!(v, 1);
        assert_eq!(saver.latest("t2").await.unwrap().unwrap().state, 9);
    }

    /// **Scenario**: Prune keeps the newest checkpoints; keep_latest=0 drops the thread.
    #[tokio::test]
    async fn prune_keeps_latest() {
        let saver = MemorySaver::<i32>::new();
        for i in 0..5 {
            saver.put("t1", &Checkpoint::new("n", i)).await.unwrap();
        }
        saver.prune("t1", 1).await.unwrap();
        let latest = saver.latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.state, 4);
        saver.prune("t1", 0).await.unwrap();
        assert!(saver.latest("t1").await.unwrap().is_none());
    }

    /// **Scenario**: Unknown thread yields None, not an error.
    #[tokio::test]
    async fn unknown_thread_is_none() {
        let saver = MemorySaver::<i32>::new();
        assert!(saver.latest("missing").await.unwrap().is_none());
        assert!(saver.prune("missing", 1).await.is_ok());
    }
}
