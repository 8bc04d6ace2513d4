//! Orchestrator error taxonomy.
//!
//! One enum for every documented error kind; `code()` is the stable wire
//! contract, `Display` messages are not. Subsystem errors (checkpoint, tool,
//! inventory, auth) convert into this type at the dispatch boundary.

use thiserror::Error;

use crate::graph::interrupt::InterruptRequest;

/// Error for orchestrator operations.
///
/// `Interrupted` and `Cancelled` are control-flow outcomes rather than faults:
/// the engine surfaces them so callers can checkpoint/acknowledge, and they map
/// to `done{interrupted}` / `done{cancelled}` on the stream instead of an
/// `error` event.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Missing, invalid, expired, or revoked session token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The caller's role lacks the capability.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Tool argument schema violation or malformed request; caller-fixable.
    #[error("bad arguments: {0}")]
    BadArguments(String),

    /// Referenced thread/job/report/tool absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Concurrent modification, e.g. resuming a thread that is not interrupted.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Reachable but retriable (connection reset, timeout under the hard limit).
    #[error("transient: {0}")]
    Transient(String),

    /// Device or store not reachable after the read-path retry.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// A configured deadline was exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A workflow loop hit its safety bound.
    #[error("iteration limit exceeded: {0}")]
    IterationLimitExceeded(String),

    /// An interrupt was resolved with reject.
    #[error("user rejected: {0}")]
    UserRejected(String),

    /// A device scope resolved to zero devices.
    #[error("empty scope: {0}")]
    EmptyScope(String),

    /// Uncategorized failure; always logged with a correlation id.
    #[error("internal error: {0}")]
    Internal(String),

    /// Execution paused for a human decision; not a fault.
    #[error("interrupted: awaiting decision for call {}", .0.call_id)]
    Interrupted(Box<InterruptRequest>),

    /// Cooperative cancellation observed at a node boundary.
    #[error("cancelled")]
    Cancelled,
}

impl OrchestratorError {
    /// Stable error code; the documented contract for `error` events and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::PermissionDenied(_) => "permission_denied",
            Self::BadArguments(_) => "bad_arguments",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Transient(_) => "transient",
            Self::Unreachable(_) => "unreachable",
            Self::Timeout(_) => "timeout",
            Self::IterationLimitExceeded(_) => "iteration_limit_exceeded",
            Self::UserRejected(_) => "user_rejected",
            Self::EmptyScope(_) => "empty_scope",
            Self::Internal(_) => "internal_error",
            Self::Interrupted(_) => "interrupted",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether a stream may continue after emitting this as an `error` event.
    pub fn recoverable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Every variant maps to its documented stable code.
    #[test]
    fn codes_are_stable() {
        assert_eq!(OrchestratorError::Unauthorized("x".into()).code(), "unauthorized");
        assert_eq!(
            OrchestratorError::PermissionDenied("x".into()).code(),
            "permission_denied"
        );
        assert_eq!(OrchestratorError::BadArguments("x".into()).code(), "bad_arguments");
        assert_eq!(OrchestratorError::NotFound("x".into()).code(), "not_found");
        assert_eq!(OrchestratorError::Conflict("x".into()).code(), "conflict");
        assert_eq!(OrchestratorError::Transient("x".into()).code(), "transient");
        assert_eq!(OrchestratorError::Unreachable("x".into()).code(), "unreachable");
        assert_eq!(OrchestratorError::Timeout("x".into()).code(), "timeout");
        assert_eq!(
            OrchestratorError::IterationLimitExceeded("x".into()).code(),
            "iteration_limit_exceeded"
        );
        assert_eq!(OrchestratorError::UserRejected("x".into()).code(), "user_rejected");
        assert_eq!(OrchestratorError::EmptyScope("x".into()).code(), "empty_scope");
        assert_eq!(OrchestratorError::Internal("x".into()).code(), "internal_error");
        assert_eq!(OrchestratorError::Cancelled.code(), "cancelled");
    }

    /// **Scenario**: Only transient errors are recoverable on a live stream.
    #[test]
    fn recoverable_only_transient() {
        assert!(OrchestratorError::Transient("reset".into()).recoverable());
        assert!(!OrchestratorError::Timeout("deadline".into()).recoverable());
        assert!(!OrchestratorError::Internal("boom".into()).recoverable());
    }
}
