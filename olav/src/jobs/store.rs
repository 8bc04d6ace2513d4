//! Job stores: in-memory and SQLite. Writes are serialized per job id; the
//! succeed transition attaches the report id and the terminal status in one
//! atomic step so observers never see `succeeded` without a retrievable report.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::OrchestratorError;
use crate::state::Progress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        })
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One asynchronous inspection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionJob {
    pub job_id: String,
    pub inspection_id: String,
    pub status: JobStatus,
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub owner_client_id: String,
}

impl InspectionJob {
    pub fn new(inspection_id: &str, owner_client_id: &str) -> Self {
        Self {
            job_id: format!("job-{}", uuid::Uuid::new_v4().simple()),
            inspection_id: inspection_id.to_string(),
            status: JobStatus::Pending,
            progress: Progress::default(),
            report_id: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
            owner_client_id: owner_client_id.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("job storage: {0}")]
    Storage(String),
}

impl From<JobError> for OrchestratorError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::NotFound(m) => OrchestratorError::NotFound(m),
            JobError::Conflict(m) => OrchestratorError::Conflict(m),
            JobError::Storage(m) => OrchestratorError::Internal(m),
        }
    }
}

/// Job persistence seam.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: InspectionJob) -> Result<(), JobError>;

    async fn get(&self, job_id: &str) -> Result<InspectionJob, JobError>;

    /// Jobs visible to a caller: `None` lists everything (admin), `Some(client)`
    /// only that client's jobs. Point-in-time snapshot, newest first.
    async fn list(&self, visible_to: Option<&str>) -> Result<Vec<InspectionJob>, JobError>;

    async fn set_running(&self, job_id: &str) -> Result<(), JobError>;

    /// Publishes progress; regressions are ignored so readers observe a monotone
    /// counter.
    async fn update_progress(&self, job_id: &str, progress: Progress) -> Result<(), JobError>;

    /// Atomic terminal transition: report id + `succeeded` together.
    async fn succeed(&self, job_id: &str, report_id: &str) -> Result<(), JobError>;

    async fn fail(&self, job_id: &str, error: &str) -> Result<(), JobError>;

    async fn cancel(&self, job_id: &str) -> Result<(), JobError>;
}

/// In-memory job store; per-entry locking serializes writes per job id.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<String, InspectionJob>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_job<T>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut InspectionJob) -> Result<T, JobError>,
    ) -> Result<T, JobError> {
        let mut job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        f(&mut job)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: InspectionJob) -> Result<(), JobError> {
        self.jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<InspectionJob, JobError> {
        self.jobs
            .get(job_id)
            .map(|j| j.clone())
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    async fn list(&self, visible_to: Option<&str>) -> Result<Vec<InspectionJob>, JobError> {
        let mut jobs: Vec<InspectionJob> = self
            .jobs
            .iter()
            .filter(|j| visible_to.map_or(true, |c| j.owner_client_id == c))
            .map(|j| j.clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn set_running(&self, job_id: &str) -> Result<(), JobError> {
        self.with_job(job_id, |job| {
            job.status = JobStatus::Running;
            Ok(())
        })
    }

    async fn update_progress(&self, job_id: &str, progress: Progress) -> Result<(), JobError> {
        self.with_job(job_id, |job| {
            if progress.completed >= job.progress.completed {
                job.progress = progress;
            }
            Ok(())
        })
    }

    async fn succeed(&self, job_id: &str, report_id: &str) -> Result<(), JobError> {
        self.with_job(job_id, |job| {
            job.status = JobStatus::Succeeded;
            job.report_id = Some(report_id.to_string());
            job.finished_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<(), JobError> {
        self.with_job(job_id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            job.finished_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn cancel(&self, job_id: &str) -> Result<(), JobError> {
        self.with_job(job_id, |job| {
            if job.status.is_terminal() {
                return Err(JobError::Conflict(format!("job {job_id} already finished")));
            }
            job.status = JobStatus::Cancelled;
            job.finished_at = Some(Utc::now());
            Ok(())
        })
    }
}

/// SQLite-backed job store; one row per job. Uses `spawn_blocking` for all
/// disk work so the executor never blocks on I/O.
pub struct SqliteJobStore {
    db_path: std::path::PathBuf,
}

impl SqliteJobStore {
    pub fn new(path: impl AsRef<std::path::Path>) -> Result<Self, JobError> {
        let db_path = path.as_ref().to_path_buf();
        let conn =
            rusqlite::Connection::open(&db_path).map_err(|e| JobError::Storage(e.to_string()))?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                inspection_id TEXT NOT NULL,
                status TEXT NOT NULL,
                progress_completed INTEGER NOT NULL DEFAULT 0,
                progress_total INTEGER NOT NULL DEFAULT 0,
                report_id TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                finished_at TEXT,
                owner_client_id TEXT NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| JobError::Storage(e.to_string()))?;
        Ok(Self { db_path })
    }

    /// Runs one blocking sqlite operation off the executor.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, JobError>
    where
        T: Send + 'static,
        F: FnOnce(rusqlite::Connection) -> Result<T, JobError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| JobError::Storage(e.to_string()))?;
            op(conn)
        })
        .await
        .map_err(|e| JobError::Storage(format!("join: {e}")))?
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<InspectionJob> {
    let status: String = row.get("status")?;
    let parse_ts = |v: String| v.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now());
    Ok(InspectionJob {
        job_id: row.get("job_id")?,
        inspection_id: row.get("inspection_id")?,
        status: status.parse().unwrap_or(JobStatus::Failed),
        progress: Progress {
            completed: row.get::<_, i64>("progress_completed")? as usize,
            total: row.get::<_, i64>("progress_total")? as usize,
        },
        report_id: row.get("report_id")?,
        error: row.get("error")?,
        created_at: parse_ts(row.get("created_at")?),
        finished_at: row.get::<_, Option<String>>("finished_at")?.map(parse_ts),
        owner_client_id: row.get("owner_client_id")?,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: InspectionJob) -> Result<(), JobError> {
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO jobs
                    (job_id, inspection_id, status, progress_completed, progress_total,
                     report_id, error, created_at, finished_at, owner_client_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    job.job_id,
                    job.inspection_id,
                    job.status.to_string(),
                    job.progress.completed as i64,
                    job.progress.total as i64,
                    job.report_id,
                    job.error,
                    job.created_at.to_rfc3339(),
                    job.finished_at.map(|t| t.to_rfc3339()),
                    job.owner_client_id,
                ],
            )
            .map_err(|e| JobError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, job_id: &str) -> Result<InspectionJob, JobError> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM jobs WHERE job_id = ?1", params![job_id], row_to_job)
                .optional()
                .map_err(|e| JobError::Storage(e.to_string()))?
                .ok_or_else(|| JobError::NotFound(job_id))
        })
        .await
    }

    async fn list(&self, visible_to: Option<&str>) -> Result<Vec<InspectionJob>, JobError> {
        let visible_to = visible_to.map(str::to_string);
        self.with_conn(move |conn| {
            let (sql, args): (&str, Vec<String>) = match visible_to {
                Some(client) => (
                    "SELECT * FROM jobs WHERE owner_client_id = ?1 ORDER BY created_at DESC",
                    vec![client],
                ),
                None => ("SELECT * FROM jobs ORDER BY created_at DESC", vec![]),
            };
            let mut stmt = conn.prepare(sql).map_err(|e| JobError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(args), row_to_job)
                .map_err(|e| JobError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| JobError::Storage(e.to_string()))
        })
        .await
    }

    async fn set_running(&self, job_id: &str) -> Result<(), JobError> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            let n = conn
                .execute(
                    "UPDATE jobs SET status = 'running' WHERE job_id = ?1",
                    params![job_id],
                )
                .map_err(|e| JobError::Storage(e.to_string()))?;
            if n == 0 {
                return Err(JobError::NotFound(job_id));
            }
            Ok(())
        })
        .await
    }

    async fn update_progress(&self, job_id: &str, progress: Progress) -> Result<(), JobError> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            // The WHERE clause keeps the counter monotone under concurrent updates.
            conn.execute(
                r#"
                UPDATE jobs SET progress_completed = ?2, progress_total = ?3
                WHERE job_id = ?1 AND progress_completed <= ?2
                "#,
                params![job_id, progress.completed as i64, progress.total as i64],
            )
            .map_err(|e| JobError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn succeed(&self, job_id: &str, report_id: &str) -> Result<(), JobError> {
        let job_id = job_id.to_string();
        let report_id = report_id.to_string();
        self.with_conn(move |conn| {
            let n = conn
                .execute(
                    "UPDATE jobs SET status = 'succeeded', report_id = ?2, finished_at = ?3 WHERE job_id = ?1",
                    params![job_id, report_id, Utc::now().to_rfc3339()],
                )
                .map_err(|e| JobError::Storage(e.to_string()))?;
            if n == 0 {
                return Err(JobError::NotFound(job_id));
            }
            Ok(())
        })
        .await
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<(), JobError> {
        let job_id = job_id.to_string();
        let error = error.to_string();
        self.with_conn(move |conn| {
            let n = conn
                .execute(
                    "UPDATE jobs SET status = 'failed', error = ?2, finished_at = ?3 WHERE job_id = ?1",
                    params![job_id, error, Utc::now().to_rfc3339()],
                )
                .map_err(|e| JobError::Storage(e.to_string()))?;
            if n == 0 {
                return Err(JobError::NotFound(job_id));
            }
            Ok(())
        })
        .await
    }

    async fn cancel(&self, job_id: &str) -> Result<(), JobError> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            let n = conn
                .execute(
                    r#"
                    UPDATE jobs SET status = 'cancelled', finished_at = ?2
                    WHERE job_id = ?1 AND status IN ('pending', 'running')
                    "#,
                    params![job_id, Utc::now().to_rfc3339()],
                )
                .map_err(|e| JobError::Storage(e.to_string()))?;
            if n == 0 {
                // Either missing or already terminal; disambiguate for the caller.
                let exists: bool = conn
                    .query_row(
                        "SELECT 1 FROM jobs WHERE job_id = ?1",
                        params![job_id],
                        |_| Ok(true),
                    )
                    .optional()
                    .map_err(|e| JobError::Storage(e.to_string()))?
                    .unwrap_or(false);
                return if exists {
                    Err(JobError::Conflict(format!("job {job_id} already finished")))
                } else {
                    Err(JobError::NotFound(job_id))
                };
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Both stores: create/get/list-visibility, monotone progress,
    /// atomic succeed, and cancel conflicts on terminal jobs.
    #[tokio::test]
    async fn job_store_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let stores: Vec<Box<dyn JobStore>> = vec![
            Box::new(MemoryJobStore::new()),
            Box::new(SqliteJobStore::new(dir.path().join("jobs.db")).unwrap()),
        ];
        for store in stores {
            let mut job = InspectionJob::new("bgp_peer_audit", "cli-a");
            job.job_id = "J1".into();
            store.create(job).await.unwrap();
            let mut other = InspectionJob::new("bgp_peer_audit", "cli-b");
            other.job_id = "J2".into();
            store.create(other).await.unwrap();

            assert_eq!(store.list(None).await.unwrap().len(), 2);
            let mine = store.list(Some("cli-a")).await.unwrap();
            assert_eq!(mine.len(), 1);
            assert_eq!(mine[0].job_id, "J1");

            store.set_running("J1").await.unwrap();
            store
                .update_progress("J1", Progress { completed: 2, total: 3 })
                .await
                .unwrap();
            // A regressed update is ignored.
            store
                .update_progress("J1", Progress { completed: 1, total: 3 })
                .await
                .unwrap();
            assert_eq!(store.get("J1").await.unwrap().progress.completed, 2);

            store.succeed("J1", "rep-1").await.unwrap();
            let done = store.get("J1").await.unwrap();
            assert_eq!(done.status, JobStatus::Succeeded);
            assert_eq!(done.report_id.as_deref(), Some("rep-1"));
            assert!(done.finished_at.is_some());

            assert!(matches!(
                store.cancel("J1").await,
                Err(JobError::Conflict(_))
            ));
            store.cancel("J2").await.unwrap();
            assert_eq!(store.get("J2").await.unwrap().status, JobStatus::Cancelled);

            store.fail("J2", "boom").await.unwrap();
            assert!(matches!(store.get("missing").await, Err(JobError::NotFound(_))));
        }
    }
}
