//! Durable conversation threads: status, pending interrupt, message log.
//!
//! A thread in `Interrupted` state holds exactly one pending interrupt; it is
//! consumed atomically by `take_pending_interrupt`, which is what makes a second
//! resume with the same decision a `Conflict` rather than a second execution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::OrchestratorError;
use crate::graph::InterruptRequest;
use crate::message::Message;
use crate::workflows::WorkflowKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Running,
    Interrupted,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ThreadStatus::Running => "running",
            ThreadStatus::Interrupted => "interrupted",
            ThreadStatus::Completed => "completed",
            ThreadStatus::Failed => "failed",
            ThreadStatus::Cancelled => "cancelled",
        })
    }
}

impl std::str::FromStr for ThreadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ThreadStatus::Running),
            "interrupted" => Ok(ThreadStatus::Interrupted),
            "completed" => Ok(ThreadStatus::Completed),
            "failed" => Ok(ThreadStatus::Failed),
            "cancelled" => Ok(ThreadStatus::Cancelled),
            other => Err(format!("unknown thread status: {other}")),
        }
    }
}

/// One durable conversation scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    pub owner_client_id: String,
    pub workflow_kind: WorkflowKind,
    pub status: ThreadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_interrupt: Option<InterruptRequest>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// A fresh running thread with a derived id: `client_id + "-" + random`.
    pub fn new(owner_client_id: &str, workflow_kind: WorkflowKind) -> Self {
        let now = Utc::now();
        Self {
            thread_id: format!("{owner_client_id}-{}", uuid::Uuid::new_v4().simple()),
            owner_client_id: owner_client_id.to_string(),
            workflow_kind,
            status: ThreadStatus::Running,
            pending_interrupt: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("thread not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("thread storage: {0}")]
    Storage(String),
}

impl From<ThreadError> for OrchestratorError {
    fn from(e: ThreadError) -> Self {
        match e {
            ThreadError::NotFound(m) => OrchestratorError::NotFound(m),
            ThreadError::Conflict(m) => OrchestratorError::Conflict(m),
            ThreadError::Storage(m) => OrchestratorError::Internal(m),
        }
    }
}

/// Thread persistence seam: status transitions plus the append-only message log.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn create(&self, thread: Thread) -> Result<(), ThreadError>;

    async fn get(&self, thread_id: &str) -> Result<Thread, ThreadError>;

    async fn set_status(&self, thread_id: &str, status: ThreadStatus) -> Result<(), ThreadError>;

    /// Records the workflow a continued conversation was re-routed to, so a
    /// later resume replays the right graph.
    async fn set_workflow_kind(
        &self,
        thread_id: &str,
        kind: WorkflowKind,
    ) -> Result<(), ThreadError>;

    /// Parks the thread interrupted with exactly this pending interrupt.
    async fn set_interrupted(
        &self,
        thread_id: &str,
        interrupt: InterruptRequest,
    ) -> Result<(), ThreadError>;

    /// Atomically consumes the pending interrupt when it matches `call_id`,
    /// leaving the thread `Running`. Any mismatch — wrong call, not interrupted,
    /// already consumed — is a `Conflict`.
    async fn take_pending_interrupt(
        &self,
        thread_id: &str,
        call_id: &str,
    ) -> Result<InterruptRequest, ThreadError>;

    async fn append_message(&self, thread_id: &str, message: &Message) -> Result<(), ThreadError>;

    /// The last `n` messages in order.
    async fn messages(&self, thread_id: &str, last_n: usize) -> Result<Vec<Message>, ThreadError>;
}

struct ThreadRecord {
    thread: Thread,
    messages: Vec<Message>,
}

/// In-memory thread store; entry-level locking gives the take atomicity.
#[derive(Default)]
pub struct MemoryThreadStore {
    threads: DashMap<String, ThreadRecord>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn create(&self, thread: Thread) -> Result<(), ThreadError> {
        let id = thread.thread_id.clone();
        if self.threads.contains_key(&id) {
            return Err(ThreadError::Conflict(format!("thread {id} already exists")));
        }
        self.threads.insert(
            id,
            ThreadRecord {
                thread,
                messages: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Thread, ThreadError> {
        self.threads
            .get(thread_id)
            .map(|r| r.thread.clone())
            .ok_or_else(|| ThreadError::NotFound(thread_id.to_string()))
    }

    async fn set_status(&self, thread_id: &str, status: ThreadStatus) -> Result<(), ThreadError> {
        let mut record = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| ThreadError::NotFound(thread_id.to_string()))?;
        record.thread.status = status;
        if status != ThreadStatus::Interrupted {
            record.thread.pending_interrupt = None;
        }
        record.thread.updated_at = Utc::now();
        Ok(())
    }

    async fn set_workflow_kind(
        &self,
        thread_id: &str,
        kind: WorkflowKind,
    ) -> Result<(), ThreadError> {
        let mut record = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| ThreadError::NotFound(thread_id.to_string()))?;
        record.thread.workflow_kind = kind;
        record.thread.updated_at = Utc::now();
        Ok(())
    }

    async fn set_interrupted(
        &self,
        thread_id: &str,
        interrupt: InterruptRequest,
    ) -> Result<(), ThreadError> {
        let mut record = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| ThreadError::NotFound(thread_id.to_string()))?;
        record.thread.status = ThreadStatus::Interrupted;
        record.thread.pending_interrupt = Some(interrupt);
        record.thread.updated_at = Utc::now();
        Ok(())
    }

    async fn take_pending_interrupt(
        &self,
        thread_id: &str,
        call_id: &str,
    ) -> Result<InterruptRequest, ThreadError> {
        let mut record = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| ThreadError::NotFound(thread_id.to_string()))?;
        if record.thread.status != ThreadStatus::Interrupted {
            return Err(ThreadError::Conflict(format!(
                "thread {thread_id} is not interrupted"
            )));
        }
        match record.thread.pending_interrupt.take() {
            Some(interrupt) if interrupt.call_id == call_id => {
                record.thread.status = ThreadStatus::Running;
                record.thread.updated_at = Utc::now();
                Ok(interrupt)
            }
            Some(interrupt) => {
                let pending = interrupt.call_id.clone();
                record.thread.pending_interrupt = Some(interrupt);
                Err(ThreadError::Conflict(format!(
                    "decision targets call {call_id}, pending call is {pending}"
                )))
            }
            None => Err(ThreadError::Conflict(format!(
                "thread {thread_id} has no pending interrupt"
            ))),
        }
    }

    async fn append_message(&self, thread_id: &str, message: &Message) -> Result<(), ThreadError> {
        let mut record = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| ThreadError::NotFound(thread_id.to_string()))?;
        record.messages.push(message.clone());
        record.thread.updated_at = Utc::now();
        Ok(())
    }

    async fn messages(&self, thread_id: &str, last_n: usize) -> Result<Vec<Message>, ThreadError> {
        let record = self
            .threads
            .get(thread_id)
            .ok_or_else(|| ThreadError::NotFound(thread_id.to_string()))?;
        let start = record.messages.len().saturating_sub(last_n);
        Ok(record.messages[start..].to_vec())
    }
}

/// SQLite-backed thread store. Uses `spawn_blocking` for all disk work so the
/// executor never blocks on I/O.
pub struct SqliteThreadStore {
    db_path: std::path::PathBuf,
}

impl SqliteThreadStore {
    pub fn new(path: impl AsRef<std::path::Path>) -> Result<Self, ThreadError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path)
            .map_err(|e| ThreadError::Storage(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                thread_id TEXT PRIMARY KEY,
                owner_client_id TEXT NOT NULL,
                workflow_kind TEXT NOT NULL,
                status TEXT NOT NULL,
                pending_interrupt TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS thread_messages (
                thread_id TEXT NOT NULL,
                message TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_thread_messages ON thread_messages (thread_id);
            "#,
        )
        .map_err(|e| ThreadError::Storage(e.to_string()))?;
        Ok(Self { db_path })
    }

    /// Runs one blocking sqlite operation off the executor.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, ThreadError>
    where
        T: Send + 'static,
        F: FnOnce(rusqlite::Connection) -> Result<T, ThreadError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| ThreadError::Storage(e.to_string()))?;
            op(conn)
        })
        .await
        .map_err(|e| ThreadError::Storage(format!("join: {e}")))?
    }
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<Thread> {
    let kind: String = row.get("workflow_kind")?;
    let status: String = row.get("status")?;
    let pending: Option<String> = row.get("pending_interrupt")?;
    let parse_ts = |v: String| v.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now());
    Ok(Thread {
        thread_id: row.get("thread_id")?,
        owner_client_id: row.get("owner_client_id")?,
        workflow_kind: kind.parse().unwrap_or(WorkflowKind::QueryDiagnostic),
        status: status.parse().unwrap_or(ThreadStatus::Failed),
        pending_interrupt: pending.and_then(|p| serde_json::from_str(&p).ok()),
        created_at: parse_ts(row.get("created_at")?),
        updated_at: parse_ts(row.get("updated_at")?),
    })
}

#[async_trait]
impl ThreadStore for SqliteThreadStore {
    async fn create(&self, thread: Thread) -> Result<(), ThreadError> {
        self.with_conn(move |conn| {
            let pending = thread
                .pending_interrupt
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| ThreadError::Storage(e.to_string()))?;
            let inserted = conn
                .execute(
                    r#"
                    INSERT OR IGNORE INTO threads
                        (thread_id, owner_client_id, workflow_kind, status, pending_interrupt, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    params![
                        thread.thread_id,
                        thread.owner_client_id,
                        thread.workflow_kind.to_string(),
                        thread.status.to_string(),
                        pending,
                        thread.created_at.to_rfc3339(),
                        thread.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(|e| ThreadError::Storage(e.to_string()))?;
            if inserted == 0 {
                return Err(ThreadError::Conflict(format!(
                    "thread {} already exists",
                    thread.thread_id
                )));
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, thread_id: &str) -> Result<Thread, ThreadError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM threads WHERE thread_id = ?1",
                params![thread_id],
                row_to_thread,
            )
            .optional()
            .map_err(|e| ThreadError::Storage(e.to_string()))?
            .ok_or_else(|| ThreadError::NotFound(thread_id))
        })
        .await
    }

    async fn set_status(&self, thread_id: &str, status: ThreadStatus) -> Result<(), ThreadError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            let clear_pending = status != ThreadStatus::Interrupted;
            let n = if clear_pending {
                conn.execute(
                    "UPDATE threads SET status = ?2, pending_interrupt = NULL, updated_at = ?3 WHERE thread_id = ?1",
                    params![thread_id, status.to_string(), Utc::now().to_rfc3339()],
                )
            } else {
                conn.execute(
                    "UPDATE threads SET status = ?2, updated_at = ?3 WHERE thread_id = ?1",
                    params![thread_id, status.to_string(), Utc::now().to_rfc3339()],
                )
            }
            .map_err(|e| ThreadError::Storage(e.to_string()))?;
            if n == 0 {
                return Err(ThreadError::NotFound(thread_id));
            }
            Ok(())
        })
        .await
    }

    async fn set_workflow_kind(
        &self,
        thread_id: &str,
        kind: WorkflowKind,
    ) -> Result<(), ThreadError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            let n = conn
                .execute(
                    "UPDATE threads SET workflow_kind = ?2, updated_at = ?3 WHERE thread_id = ?1",
                    params![thread_id, kind.to_string(), Utc::now().to_rfc3339()],
                )
                .map_err(|e| ThreadError::Storage(e.to_string()))?;
            if n == 0 {
                return Err(ThreadError::NotFound(thread_id));
            }
            Ok(())
        })
        .await
    }

    async fn set_interrupted(
        &self,
        thread_id: &str,
        interrupt: InterruptRequest,
    ) -> Result<(), ThreadError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            let pending = serde_json::to_string(&interrupt)
                .map_err(|e| ThreadError::Storage(e.to_string()))?;
            let n = conn
                .execute(
                    "UPDATE threads SET status = 'interrupted', pending_interrupt = ?2, updated_at = ?3 WHERE thread_id = ?1",
                    params![thread_id, pending, Utc::now().to_rfc3339()],
                )
                .map_err(|e| ThreadError::Storage(e.to_string()))?;
            if n == 0 {
                return Err(ThreadError::NotFound(thread_id));
            }
            Ok(())
        })
        .await
    }

    async fn take_pending_interrupt(
        &self,
        thread_id: &str,
        call_id: &str,
    ) -> Result<InterruptRequest, ThreadError> {
        let thread_id = thread_id.to_string();
        let call_id = call_id.to_string();
        self.with_conn(move |mut conn| {
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(|e| ThreadError::Storage(e.to_string()))?;
            let row: Option<(String, Option<String>)> = tx
                .query_row(
                    "SELECT status, pending_interrupt FROM threads WHERE thread_id = ?1",
                    params![thread_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| ThreadError::Storage(e.to_string()))?;
            let (status, pending) =
                row.ok_or_else(|| ThreadError::NotFound(thread_id.clone()))?;
            if status != "interrupted" {
                return Err(ThreadError::Conflict(format!(
                    "thread {thread_id} is not interrupted"
                )));
            }
            let interrupt: InterruptRequest = pending
                .as_deref()
                .and_then(|p| serde_json::from_str(p).ok())
                .ok_or_else(|| {
                    ThreadError::Conflict(format!("thread {thread_id} has no pending interrupt"))
                })?;
            if interrupt.call_id != call_id {
                return Err(ThreadError::Conflict(format!(
                    "decision targets call {call_id}, pending call is {}",
                    interrupt.call_id
                )));
            }
            tx.execute(
                "UPDATE threads SET status = 'running', pending_interrupt = NULL, updated_at = ?2 WHERE thread_id = ?1",
                params![thread_id, Utc::now().to_rfc3339()],
            )
            .map_err(|e| ThreadError::Storage(e.to_string()))?;
            tx.commit().map_err(|e| ThreadError::Storage(e.to_string()))?;
            Ok(interrupt)
        })
        .await
    }

    async fn append_message(&self, thread_id: &str, message: &Message) -> Result<(), ThreadError> {
        let thread_id = thread_id.to_string();
        let body =
            serde_json::to_string(message).map_err(|e| ThreadError::Storage(e.to_string()))?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO thread_messages (thread_id, message) VALUES (?1, ?2)",
                params![thread_id, body],
            )
            .map_err(|e| ThreadError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn messages(&self, thread_id: &str, last_n: usize) -> Result<Vec<Message>, ThreadError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT message FROM (
                        SELECT rowid, message FROM thread_messages WHERE thread_id = ?1
                        ORDER BY rowid DESC LIMIT ?2
                    ) ORDER BY rowid ASC",
                )
                .map_err(|e| ThreadError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![thread_id, last_n as i64], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| ThreadError::Storage(e.to_string()))?;
            let mut messages = Vec::new();
            for row in rows {
                let body = row.map_err(|e| ThreadError::Storage(e.to_string()))?;
                if let Ok(message) = serde_json::from_str(&body) {
                    messages.push(message);
                }
            }
            Ok(messages)
        })
        .await
    }
}
