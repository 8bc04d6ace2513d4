//! Inspection job endpoints and report retrieval.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use olav::jobs::InspectionJob;
use olav::OrchestratorError;

use crate::app::AppState;
use crate::auth::require_session;
use crate::error::ApiError;

/// POST /inspections/{id}/run — submit a detached job; responds immediately.
pub(crate) async fn run_inspection(
    State(state): State<AppState>,
    Path(inspection_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state, &headers).await?;
    let job_id = state
        .orchestrator
        .jobs
        .submit(&session, &inspection_id)
        .await
        .map_err(ApiError)?;
    Ok(Json(serde_json::json!({"job_id": job_id})))
}

/// GET /inspections/jobs — jobs visible to the caller.
pub(crate) async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<InspectionJob>>, ApiError> {
    let session = require_session(&state, &headers).await?;
    let jobs = state
        .orchestrator
        .jobs
        .list_jobs(&session)
        .await
        .map_err(ApiError)?;
    Ok(Json(jobs))
}

/// GET /inspections/jobs/{id} — owner or admin.
pub(crate) async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<InspectionJob>, ApiError> {
    let session = require_session(&state, &headers).await?;
    let job = state
        .orchestrator
        .jobs
        .get_job(&session, &job_id)
        .await
        .map_err(ApiError)?;
    Ok(Json(job))
}

/// GET /reports/{id} — any valid session; reads are idempotent.
pub(crate) async fn report(
    State(state): State<AppState>,
    Path(report_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_session(&state, &headers).await?;
    let report = state
        .orchestrator
        .reports
        .get(&report_id)
        .await
        .map_err(|e| ApiError(OrchestratorError::NotFound(e.to_string())))?;
    Ok(Json(serde_json::json!({
        "report_id": report.report_id,
        "inspection_id": report.inspection_id,
        "summary": report.summary,
        "content": report.content,
        "created_at": report.created_at,
    })))
}
