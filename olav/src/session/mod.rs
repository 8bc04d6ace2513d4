//! Session & authorization: the two-tier token model.
//!
//! The process holds one master token (injected or generated and logged once at
//! startup); only master-token holders can create sessions. Operational requests
//! carry per-client session tokens bound to a [`Role`]. Tokens are never stored
//! in clear — stores are keyed by the SHA-256 digest, and the master comparison
//! is constant-time.

mod manager;
mod store;

pub use manager::{generate_master_token, NewSession, SessionManager};
pub use store::{MemorySessionStore, SessionStore, SqliteSessionStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::OrchestratorError;

/// Caller role; the permission matrix is enforced at the API boundary and again
/// at workflow selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
}

impl Role {
    /// Write-capable workflows (device config, inventory mutation).
    /// Operators still pass through HITL; only admins may auto-approve.
    pub fn can_execute_writes(&self) -> bool {
        matches!(self, Role::Admin | Role::Operator)
    }

    /// The expert deep-dive workflow.
    pub fn can_deep_dive(&self) -> bool {
        matches!(self, Role::Admin | Role::Operator)
    }

    /// Skip the HITL gate entirely.
    pub fn auto_approve(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn can_manage_sessions(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "operator" => Ok(Role::Operator),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
        })
    }
}

/// Authenticated caller identity. The token itself is never held here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub client_id: String,
    pub client_name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub revoked: bool,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("session storage: {0}")]
    Storage(String),
}

impl From<AuthError> for OrchestratorError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Unauthorized(m) => OrchestratorError::Unauthorized(m),
            AuthError::PermissionDenied(m) => OrchestratorError::PermissionDenied(m),
            AuthError::Storage(m) => OrchestratorError::Internal(m),
        }
    }
}
