//! Token extraction and the session management endpoints.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use olav::session::{Role, Session};
use olav::OrchestratorError;
use serde::Deserialize;

use crate::app::AppState;
use crate::error::ApiError;

/// Pulls the bearer token from `Authorization`. A bare token (no scheme) is
/// accepted for CLI convenience.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError(OrchestratorError::Unauthorized(
                "missing Authorization header".into(),
            ))
        })?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    if token.is_empty() {
        return Err(ApiError(OrchestratorError::Unauthorized(
            "empty bearer token".into(),
        )));
    }
    Ok(token.to_string())
}

/// Validates the session token on a protected request.
pub(crate) async fn require_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Session, ApiError> {
    let token = bearer_token(headers)?;
    state
        .orchestrator
        .sessions
        .validate(&token)
        .await
        .map_err(|e| ApiError(e.into()))
}

pub(crate) async fn require_admin(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Session, ApiError> {
    let session = require_session(state, headers).await?;
    if !session.role.can_manage_sessions() {
        return Err(ApiError(OrchestratorError::PermissionDenied(
            "session management requires the admin role".into(),
        )));
    }
    Ok(session)
}

#[derive(Deserialize)]
pub(crate) struct RegisterBody {
    client_name: String,
    #[serde(default)]
    role: Option<Role>,
}

/// POST /auth/register — master token only.
pub(crate) async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let master = bearer_token(&headers)?;
    let created = state
        .orchestrator
        .sessions
        .create_session(&master, &body.client_name, body.role)
        .await
        .map_err(|e| ApiError(e.into()))?;
    Ok(Json(serde_json::json!({
        "token": created.token,
        "client_id": created.client_id,
        "expires_at": created.session.expires_at,
    })))
}

/// GET /auth/sessions — admin only.
pub(crate) async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Session>>, ApiError> {
    require_admin(&state, &headers).await?;
    let sessions = state
        .orchestrator
        .sessions
        .list_active()
        .await
        .map_err(|e| ApiError(e.into()))?;
    Ok(Json(sessions))
}

/// POST /auth/revoke/{token} — admin only; accepts a token or a client id.
pub(crate) async fn revoke(
    State(state): State<AppState>,
    Path(target): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let revoked = state
        .orchestrator
        .sessions
        .revoke(&target)
        .await
        .map_err(|e| ApiError(e.into()))?;
    Ok(Json(serde_json::json!({"revoked": revoked})))
}
