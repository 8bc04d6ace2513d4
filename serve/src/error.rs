//! HTTP mapping for orchestrator errors: stable `code` + message body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use olav::OrchestratorError;

/// Wrapper turning an [`OrchestratorError`] into an HTTP response with a JSON
/// body `{code, message}`. The code is the documented contract.
pub struct ApiError(pub OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        ApiError(e)
    }
}

fn status_for(e: &OrchestratorError) -> StatusCode {
    match e {
        OrchestratorError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        OrchestratorError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        OrchestratorError::BadArguments(_) | OrchestratorError::EmptyScope(_) => {
            StatusCode::BAD_REQUEST
        }
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::Conflict(_) => StatusCode::CONFLICT,
        OrchestratorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        OrchestratorError::Transient(_) | OrchestratorError::Unreachable(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = Json(serde_json::json!({
            "code": self.0.code(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Each error kind maps to its documented HTTP status.
    #[test]
    fn status_mapping() {
        assert_eq!(
            status_for(&OrchestratorError::Unauthorized("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&OrchestratorError::PermissionDenied("x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&OrchestratorError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&OrchestratorError::Conflict("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&OrchestratorError::BadArguments("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&OrchestratorError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
