//! Session manager: token minting, validation, revocation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{AuthError, Role, Session, SessionStore};

/// Result of `create_session`; the clear token exists only here, once.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub token: String,
    pub client_id: String,
    pub session: Session,
}

/// Constant-time byte comparison; both master and session digests go through
/// this rather than `==`.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn digest_hex(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Derives the stable client id for a client name.
fn client_id_for(client_name: &str) -> String {
    let digest = digest_hex(&format!("client:{client_name}"));
    format!("cli-{}", &digest[..8])
}

/// Mints a fresh high-entropy session token.
fn fresh_token(prefix: &str) -> String {
    format!(
        "{prefix}-{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// Mints a master token, for deployments that provision `MASTER_TOKEN` ahead
/// of first boot.
pub fn generate_master_token() -> String {
    fresh_token("olav-master")
}

/// Two-tier token authority: holds the master digest, mints session tokens, and
/// validates every protected request.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    master_digest: Vec<u8>,
    ttl: Duration,
}

impl SessionManager {
    /// Builds the manager. When no master token is configured, one is generated
    /// and returned so the caller can log it exactly once.
    pub fn bootstrap(
        store: Arc<dyn SessionStore>,
        configured_master: Option<String>,
        ttl_hours: u64,
    ) -> (Self, Option<String>) {
        let (master, generated) = match configured_master {
            Some(token) => (token, None),
            None => {
                let token = generate_master_token();
                (token.clone(), Some(token))
            }
        };
        let mut hasher = Sha256::new();
        hasher.update(master.as_bytes());
        (
            Self {
                store,
                master_digest: hasher.finalize().to_vec(),
                ttl: Duration::hours(ttl_hours as i64),
            },
            generated,
        )
    }

    /// Whether the presented token is the master token (constant-time).
    pub fn is_master(&self, token: &str) -> bool {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        ct_eq(&hasher.finalize(), &self.master_digest)
    }

    /// Creates a session. Requires master auth; the requested role defaults to
    /// operator when absent. Admin sessions likewise require the master token,
    /// which the caller has already presented.
    pub async fn create_session(
        &self,
        master_token: &str,
        client_name: &str,
        requested_role: Option<Role>,
    ) -> Result<NewSession, AuthError> {
        if !self.is_master(master_token) {
            return Err(AuthError::Unauthorized(
                "session registration requires the master token".into(),
            ));
        }
        if client_name.trim().is_empty() {
            return Err(AuthError::Unauthorized("client_name must not be empty".into()));
        }
        let role = requested_role.unwrap_or(Role::Operator);
        let now = Utc::now();
        let session = Session {
            client_id: client_id_for(client_name),
            client_name: client_name.to_string(),
            role,
            created_at: now,
            expires_at: now + self.ttl,
            last_used_at: now,
            revoked: false,
        };
        let token = fresh_token("olav");
        self.store.insert(&digest_hex(&token), session.clone()).await?;
        tracing::info!(client = %session.client_id, role = %role, "session created");
        Ok(NewSession {
            token,
            client_id: session.client_id.clone(),
            session,
        })
    }

    /// Validates a session token: unknown, revoked, and expired tokens all fail
    /// with `Unauthorized`. Expired sessions are swept opportunistically.
    pub async fn validate(&self, token: &str) -> Result<Session, AuthError> {
        let digest = digest_hex(token);
        let session = self
            .store
            .get(&digest)
            .await?
            .ok_or_else(|| AuthError::Unauthorized("unknown session token".into()))?;
        if session.revoked {
            return Err(AuthError::Unauthorized("session revoked".into()));
        }
        let now = Utc::now();
        if session.is_expired(now) {
            let _ = self.store.purge_expired(now).await;
            return Err(AuthError::Unauthorized("session expired".into()));
        }
        self.store.touch(&digest, now).await?;
        Ok(session)
    }

    /// Revokes by session token or by client id; subsequent validations fail.
    pub async fn revoke(&self, target: &str) -> Result<usize, AuthError> {
        if self.store.revoke_digest(&digest_hex(target)).await? {
            return Ok(1);
        }
        let count = self.store.revoke_client(target).await?;
        if count == 0 {
            return Err(AuthError::Unauthorized(format!(
                "no session or client matches '{target}'"
            )));
        }
        Ok(count)
    }

    pub async fn list_active(&self) -> Result<Vec<Session>, AuthError> {
        self.store.list_active(Utc::now()).await
    }

    /// Garbage-collects expired sessions.
    pub async fn purge_expired(&self) -> Result<usize, AuthError> {
        self.store.purge_expired(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;

    fn manager() -> (SessionManager, String) {
        let store = Arc::new(MemorySessionStore::new());
        let (mgr, generated) = SessionManager::bootstrap(store, None, 168);
        let master = generated.expect("generated master");
        (mgr, master)
    }

    /// **Scenario**: Register then validate returns the expected role and client id;
    /// the client id is stable across sessions of the same client.
    #[tokio::test]
    async fn register_validate_roundtrip() {
        let (mgr, master) = manager();
        let created = mgr
            .create_session(&master, "ops-console", Some(Role::Admin))
            .await
            .unwrap();
        let session = mgr.validate(&created.token).await.unwrap();
        assert_eq!(session.role, Role::Admin);
        assert_eq!(session.client_id, created.client_id);

        let again = mgr
            .create_session(&master, "ops-console", None)
            .await
            .unwrap();
        assert_eq!(again.client_id, created.client_id, "client_id stable per client");
        assert_eq!(again.session.role, Role::Operator, "role defaults to operator");
        assert_ne!(again.token, created.token, "tokens are fresh per session");
    }

    /// **Scenario**: A wrong master token cannot create sessions; session tokens
    /// are not master tokens.
    #[tokio::test]
    async fn master_required_for_registration() {
        let (mgr, master) = manager();
        assert!(mgr
            .create_session("wrong", "x", None)
            .await
            .is_err());
        let created = mgr.create_session(&master, "x", None).await.unwrap();
        assert!(!mgr.is_master(&created.token));
        assert!(mgr.is_master(&master));
    }

    /// **Scenario**: After revoke (by token), validate fails; revoke by client id
    /// kills every session of that client; unknown targets error.
    #[tokio::test]
    async fn revocation_by_token_and_client() {
        let (mgr, master) = manager();
        let a = mgr.create_session(&master, "alice", None).await.unwrap();
        let b = mgr.create_session(&master, "alice", None).await.unwrap();

        assert_eq!(mgr.revoke(&a.token).await.unwrap(), 1);
        assert!(mgr.validate(&a.token).await.is_err());
        assert!(mgr.validate(&b.token).await.is_ok());

        assert_eq!(mgr.revoke(&a.client_id).await.unwrap(), 1);
        assert!(mgr.validate(&b.token).await.is_err());

        assert!(mgr.revoke("nonexistent").await.is_err());
    }

    /// **Scenario**: An expired session fails validation and is garbage-collected.
    #[tokio::test]
    async fn expired_session_fails_and_is_collected() {
        let store = Arc::new(MemorySessionStore::new());
        let (mgr, master) = SessionManager::bootstrap(store.clone(), None, 0);
        let master = master.unwrap();
        let created = mgr.create_session(&master, "short", None).await.unwrap();
        assert!(mgr.validate(&created.token).await.is_err());
        assert!(mgr.list_active().await.unwrap().is_empty());
    }

    /// **Scenario**: Validation bumps last_used_at.
    #[tokio::test]
    async fn validate_touches_last_used() {
        let (mgr, master) = manager();
        let created = mgr.create_session(&master, "x", None).await.unwrap();
        let before = created.session.last_used_at;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let validated = mgr.validate(&created.token).await.unwrap();
        let after = mgr.validate(&created.token).await.unwrap();
        assert!(after.last_used_at >= validated.last_used_at);
        assert!(validated.last_used_at >= before);
    }
}
