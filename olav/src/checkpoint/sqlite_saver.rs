//! SQLite-backed checkpointer. Persistent across process restarts.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, CheckpointError, Checkpointer, CHECKPOINT_SCHEMA_VERSION};

/// Storage envelope around the state blob; `v` is checked on load so blobs from
/// an incompatible layout fail fast instead of deserializing garbage.
#[derive(Serialize, Deserialize)]
struct BlobEnvelope<S> {
    v: u32,
    state: S,
}

/// SQLite-backed checkpointer. Rows keyed by (thread_id, version).
///
/// `put` runs in one IMMEDIATE transaction: version assignment and insert are a
/// single atomic step, which serializes writers per thread at the store level.
/// Blocking work goes through `spawn_blocking`.
///
/// **Interaction**: Used as `Arc<dyn Checkpointer<S>>` in
/// `WorkflowGraph::compile_with_checkpointer`.
pub struct SqliteSaver<S> {
    db_path: std::path::PathBuf,
    _state: std::marker::PhantomData<fn() -> S>,
}

impl<S> SqliteSaver<S> {
    /// Opens (or creates) the database and ensures the checkpoints table exists.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path)
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                current_node TEXT NOT NULL,
                state BLOB NOT NULL,
                pending_calls TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (thread_id, version)
            )
            "#,
            [],
        )
        .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(Self {
            db_path,
            _state: std::marker::PhantomData,
        })
    }
}

fn decode_row<S: DeserializeOwned>(
    version: u64,
    current_node: String,
    blob: Vec<u8>,
    pending: String,
    created_at: String,
) -> Result<Checkpoint<S>, CheckpointError> {
    let envelope: BlobEnvelope<S> = serde_json::from_slice(&blob)
        .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
    if envelope.v != CHECKPOINT_SCHEMA_VERSION {
        return Err(CheckpointError::IncompatibleSchema {
            found: envelope.v,
            expected: CHECKPOINT_SCHEMA_VERSION,
        });
    }
    let pending_call_ids: Vec<String> = serde_json::from_str(&pending)
        .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
    let created_at = created_at
        .parse::<DateTime<Utc>>()
        .unwrap_or_else(|_| Utc::now());
    Ok(Checkpoint {
        version,
        current_node,
        state: envelope.state,
        pending_call_ids,
        created_at,
    })
}

#[async_trait]
impl<S> Checkpointer<S> for SqliteSaver<S>
where
    S: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    async fn put(
        &self,
        thread_id: &str,
        checkpoint: &Checkpoint<S>,
    ) -> Result<u64, CheckpointError> {
        let blob = serde_json::to_vec(&BlobEnvelope {
            v: CHECKPOINT_SCHEMA_VERSION,
            state: checkpoint.state.clone(),
        })
        .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let pending = serde_json::to_string(&checkpoint.pending_call_ids)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let current_node = checkpoint.current_node.clone();
        let created_at = checkpoint.created_at.to_rfc3339();
        let thread_id = thread_id.to_string();
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            let version: u64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(version), 0) + 1 FROM checkpoints WHERE thread_id = ?1",
                    params![thread_id],
                    |row| row.get(0),
                )
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            tx.execute(
                r#"
                INSERT INTO checkpoints
                    (thread_id, version, current_node, state, pending_calls, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![thread_id, version, current_node, blob, pending, created_at],
            )
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            tx.commit()
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            Ok(version)
        })
        .await
        .map_err(|e| CheckpointError::Storage(format!("join: {e}")))?
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>, CheckpointError> {
        let thread_id = thread_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            let row = conn
                .query_row(
                    r#"
                    SELECT version, current_node, state, pending_calls, created_at
                    FROM checkpoints WHERE thread_id = ?1
                    ORDER BY version DESC LIMIT 1
                    "#,
                    params![thread_id],
                    |row| {
                        Ok((
                            row.get::<_, u64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            match row {
                Some((version, node, blob, pending, created)) => {
                    decode_row(version, node, blob, pending, created).map(Some)
                }
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| CheckpointError::Storage(format!("join: {e}")))?
    }

    async fn prune(&self, thread_id: &str, keep_latest: usize) -> Result<(), CheckpointError> {
        let thread_id = thread_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            conn.execute(
                r#"
                DELETE FROM checkpoints
                WHERE thread_id = ?1 AND version NOT IN (
                    SELECT version FROM checkpoints WHERE thread_id = ?1
                    ORDER BY version DESC LIMIT ?2
                )
                "#,
                params![thread_id, keep_latest as i64],
            )
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| CheckpointError::Storage(format!("join: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_saver() -> (tempfile::TempDir, SqliteSaver<serde_json::Value>) {
        let dir = tempfile::tempdir().unwrap();
        let saver = SqliteSaver::new(dir.path().join("checkpoints.db")).unwrap();
        (dir, saver)
    }

    /// **Scenario**: put/latest round-trip preserves state, node, and pending calls.
    #[tokio::test]
    async fn put_latest_roundtrip() {
        let (_dir, saver) = temp_saver();
        let cp = Checkpoint::new("approval_gate", serde_json::json!({"plan": "shut"}))
            .with_pending(vec!["c1".to_string()]);
        let v = saver.put("cli-1", &cp).await.unwrap();
        assert_eq!(v, 1);
        let latest = saver.latest("cli-1").await.unwrap().unwrap();
        assert_eq!(latest.version, 1);
        assert_eq!(latest.current_node, "approval_gate");
        assert_eq!(latest.state["plan"], "shut");
        assert_eq!(latest.pending_call_ids, vec!["c1"]);
    }

    /// **Scenario**: Versions are monotone per thread and independent across threads.
    #[tokio::test]
    async fn versions_monotone_per_thread() {
        let (_dir, saver) = temp_saver();
        let cp = Checkpoint::new("n", serde_json::json!(1));
        assert_eq!(saver.put("a", &cp).await.unwrap(), 1);
        assert_eq!(saver.put("a", &cp).await.unwrap(), 2);
        assert_eq!(saver.put("b", &cp).await.unwrap(), 1);
    }

    /// **Scenario**: A blob with a foreign schema version fails with IncompatibleSchema.
    #[tokio::test]
    async fn incompatible_schema_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");
        let saver = SqliteSaver::<serde_json::Value>::new(&path).unwrap();
        saver
            .put("t", &Checkpoint::new("n", serde_json::json!(1)))
            .await
            .unwrap();
        // Rewrite the stored blob with a bumped envelope version.
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE checkpoints SET state = ?1",
            params![serde_json::to_vec(&serde_json::json!({"v": 99, "state": 1})).unwrap()],
        )
        .unwrap();
        match saver.latest("t").await {
            Err(CheckpointError::IncompatibleSchema { found, expected }) => {
                assert_eq!(found, 99);
                assert_eq!(expected, CHECKPOINT_SCHEMA_VERSION);
            }
            other => panic!("expected IncompatibleSchema, got {other:?}"),
        }
    }

    /// **Scenario**: Prune retains only the newest versions.
    #[tokio::test]
    async fn prune_retains_newest() {
        let (_dir, saver) = temp_saver();
        for i in 0..4 {
            saver
                .put("t", &Checkpoint::new("n", serde_json::json!(i)))
                .await
                .unwrap();
        }
        saver.prune("t", 1).await.unwrap();
        let latest = saver.latest("t").await.unwrap().unwrap();
        assert_eq!(latest.version, 4);
        assert_eq!(latest.state, serde_json::json!(3));
    }
}
