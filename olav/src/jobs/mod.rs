//! Job & inspection layer: detached batch runs over the same workflow engine.
//!
//! Submission returns immediately with a pending job; a bounded worker pool
//! drains the queue, runs the Inspection workflow on a fresh thread with a live
//! progress sink, and finishes with the atomic `report_id` + `succeeded`
//! transition. A panicking run is contained to that job (`failed` with an
//! internal error); the worker keeps serving.

mod store;

pub use store::{InspectionJob, JobError, JobStatus, JobStore, MemoryJobStore, SqliteJobStore};

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::Checkpointer;
use crate::error::OrchestratorError;
use crate::graph::RunContext;
use crate::session::Session;
use crate::state::{Progress, WorkflowState};
use crate::stream::StreamEmitter;
use crate::workflows::inspection::{build_inspection_workflow, InspectionProfile};
use crate::workflows::{scratch_keys, WorkflowContext};

/// Default worker pool size.
pub const DEFAULT_JOB_WORKERS: usize = 4;

/// Manages submission, execution, and lifecycle of inspection jobs.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    profiles: HashMap<String, InspectionProfile>,
    queue_tx: mpsc::Sender<String>,
    cancels: Arc<DashMap<String, CancellationToken>>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl JobManager {
    /// Spawns the worker pool and returns the manager.
    pub fn start(
        ctx: Arc<WorkflowContext>,
        checkpointer: Arc<dyn Checkpointer<WorkflowState>>,
        store: Arc<dyn JobStore>,
        profiles: Vec<InspectionProfile>,
        worker_count: usize,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel::<String>(1024);
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let cancels: Arc<DashMap<String, CancellationToken>> = Arc::new(DashMap::new());
        let profile_map: HashMap<String, InspectionProfile> =
            profiles.into_iter().map(|p| (p.id.clone(), p)).collect();

        let mut workers = Vec::with_capacity(worker_count.max(1));
        for worker_id in 0..worker_count.max(1) {
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                queue_rx.clone(),
                store.clone(),
                ctx.clone(),
                checkpointer.clone(),
                profile_map.clone(),
                cancels.clone(),
            )));
        }
        Self {
            store,
            profiles: profile_map,
            queue_tx,
            cancels,
            workers,
        }
    }

    /// Submits an inspection for background execution. Returns the job id with
    /// the job still `pending`.
    pub async fn submit(
        &self,
        session: &Session,
        inspection_id: &str,
    ) -> Result<String, OrchestratorError> {
        if !session.role.can_execute_writes() {
            return Err(OrchestratorError::PermissionDenied(format!(
                "role {} may not submit inspections",
                session.role
            )));
        }
        if !self.profiles.contains_key(inspection_id) {
            return Err(OrchestratorError::NotFound(format!(
                "inspection profile {inspection_id}"
            )));
        }
        let job = InspectionJob::new(inspection_id, &session.client_id);
        let job_id = job.job_id.clone();
        self.store.create(job).await.map_err(OrchestratorError::from)?;
        self.queue_tx
            .send(job_id.clone())
            .await
            .map_err(|_| OrchestratorError::Internal("job queue closed".into()))?;
        tracing::info!(job = %job_id, inspection = %inspection_id, "inspection job submitted");
        Ok(job_id)
    }

    /// Job status for the owner or an admin.
    pub async fn get_job(
        &self,
        session: &Session,
        job_id: &str,
    ) -> Result<InspectionJob, OrchestratorError> {
        let job = self.store.get(job_id).await.map_err(OrchestratorError::from)?;
        if job.owner_client_id != session.client_id && !session.role.can_manage_sessions() {
            return Err(OrchestratorError::PermissionDenied(format!(
                "job {job_id} belongs to another client"
            )));
        }
        Ok(job)
    }

    /// Jobs visible to the caller: admins see everything.
    pub async fn list_jobs(&self, session: &Session) -> Result<Vec<InspectionJob>, OrchestratorError> {
        let visible_to = if session.role.can_manage_sessions() {
            None
        } else {
            Some(session.client_id.as_str())
        };
        self.store.list(visible_to).await.map_err(OrchestratorError::from)
    }

    /// Cooperative cancellation: queued jobs are cancelled in place, running jobs
    /// get their token fired and stop at the next node boundary.
    pub async fn cancel_job(&self, session: &Session, job_id: &str) -> Result<(), OrchestratorError> {
        // Ownership check rides along with the read.
        let job = self.get_job(session, job_id).await?;
        if job.status.is_terminal() {
            return Err(OrchestratorError::Conflict(format!(
                "job {job_id} already finished"
            )));
        }
        if let Some(token) = self.cancels.get(job_id) {
            token.cancel();
        } else {
            self.store.cancel(job_id).await.map_err(OrchestratorError::from)?;
        }
        Ok(())
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue_rx: Arc<Mutex<mpsc::Receiver<String>>>,
    store: Arc<dyn JobStore>,
    ctx: Arc<WorkflowContext>,
    checkpointer: Arc<dyn Checkpointer<WorkflowState>>,
    profiles: HashMap<String, InspectionProfile>,
    cancels: Arc<DashMap<String, CancellationToken>>,
) {
    loop {
        let job_id = {
            let mut rx = queue_rx.lock().await;
            match rx.recv().await {
                Some(id) => id,
                None => return,
            }
        };
        let job = match store.get(&job_id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(worker = worker_id, job = %job_id, error = %e, "queued job unreadable");
                continue;
            }
        };
        // Cancelled while still queued.
        if job.status != JobStatus::Pending {
            continue;
        }
        let Some(profile) = profiles.get(&job.inspection_id).cloned() else {
            let _ = store.fail(&job_id, "inspection profile vanished").await;
            continue;
        };
        if store.set_running(&job_id).await.is_err() {
            continue;
        }
        let token = CancellationToken::new();
        cancels.insert(job_id.clone(), token.clone());
        tracing::info!(worker = worker_id, job = %job_id, "inspection job started");

        // Panic containment: the run happens in its own task so a panic fails
        // only this job; the worker keeps serving the queue.
        let run = tokio::spawn(run_inspection(
            ctx.clone(),
            checkpointer.clone(),
            store.clone(),
            profile,
            job_id.clone(),
            token.clone(),
        ));
        match run.await {
            Ok(Ok(report_id)) => {
                if let Err(e) = store.succeed(&job_id, &report_id).await {
                    tracing::error!(job = %job_id, error = %e, "could not record job success");
                }
            }
            Ok(Err(OrchestratorError::Cancelled)) => {
                let _ = store.cancel(&job_id).await;
            }
            Ok(Err(e)) => {
                let _ = store.fail(&job_id, &format!("{}: {e}", e.code())).await;
            }
            Err(join_error) => {
                tracing::error!(worker = worker_id, job = %job_id, error = %join_error, "inspection run panicked");
                let _ = store.fail(&job_id, "internal_error: inspection run panicked").await;
            }
        }
        cancels.remove(&job_id);
    }
}

/// Runs one inspection to completion; returns the report id.
async fn run_inspection(
    ctx: Arc<WorkflowContext>,
    checkpointer: Arc<dyn Checkpointer<WorkflowState>>,
    store: Arc<dyn JobStore>,
    profile: InspectionProfile,
    job_id: String,
    cancel: CancellationToken,
) -> Result<String, OrchestratorError> {
    let progress_store = store.clone();
    let progress_job = job_id.clone();
    let progress: crate::fanout::ProgressFn = Arc::new(move |p: Progress| {
        let store = progress_store.clone();
        let job_id = progress_job.clone();
        tokio::spawn(async move {
            if let Err(e) = store.update_progress(&job_id, p).await {
                tracing::warn!(job = %job_id, error = %e, "progress update failed");
            }
        });
    });

    let workflow = build_inspection_workflow(ctx, Some(progress), Some(checkpointer))
        .map_err(|e| OrchestratorError::Internal(format!("inspection graph: {e}")))?;

    let mut state = WorkflowState::default();
    state.set_scratch(scratch_keys::INSPECTION_PROFILE, &profile);
    let rc = RunContext::new(format!("jobthread-{job_id}"), StreamEmitter::sink()).with_cancel(cancel);
    let out = workflow.invoke(state, &rc).await?;
    out.scratch::<String>(scratch_keys::REPORT_ID)
        .ok_or_else(|| OrchestratorError::Internal("inspection finished without a report".into()))
}
