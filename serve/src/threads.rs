//! Thread inspection endpoint.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::app::AppState;
use crate::auth::require_session;
use crate::error::ApiError;

const DEFAULT_LAST_N: usize = 20;

#[derive(Deserialize)]
pub(crate) struct ThreadQuery {
    #[serde(default)]
    last: Option<usize>,
}

/// GET /threads/{id} — status + last N messages, owner or admin only.
pub(crate) async fn thread_status(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(query): Query<ThreadQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state, &headers).await?;
    let (thread, messages) = state
        .orchestrator
        .dispatcher
        .thread_view(&session, &thread_id, query.last.unwrap_or(DEFAULT_LAST_N))
        .await
        .map_err(ApiError)?;
    Ok(Json(serde_json::json!({
        "thread": thread,
        "messages": messages,
    })))
}
