//! Axum app: shared state and the route table.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use olav::bootstrap::Orchestrator;

use crate::{auth, inspections, stream, threads};

/// Shared per-request state: the orchestrator built at startup.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(config))
        .route("/auth/register", post(auth::register))
        .route("/auth/sessions", get(auth::list_sessions))
        .route("/auth/revoke/:token", post(auth::revoke))
        .route("/orchestrator/stream", post(stream::stream_workflow))
        .route("/orchestrator/resume", post(stream::resume_workflow))
        .route("/threads/:id", get(threads::thread_status))
        .route("/inspections/:id/run", post(inspections::run_inspection))
        .route("/inspections/jobs", get(inspections::list_jobs))
        .route("/inspections/jobs/:id", get(inspections::job_status))
        .route("/reports/:id", get(inspections::report))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn config(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    Json(state.orchestrator.settings.public())
}
