//! Session stores, keyed by token digest (hex SHA-256). In-memory and SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{params, OptionalExtension};

use super::{AuthError, Role, Session};

/// Storage seam for sessions. Keys are token digests; clear tokens never reach
/// a store. Mutation happens only through the session manager; readers get
/// snapshot values.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, digest: &str, session: Session) -> Result<(), AuthError>;

    async fn get(&self, digest: &str) -> Result<Option<Session>, AuthError>;

    /// Updates `last_used_at` for a live session.
    async fn touch(&self, digest: &str, at: DateTime<Utc>) -> Result<(), AuthError>;

    /// Marks the session with this digest revoked. Returns whether it existed.
    async fn revoke_digest(&self, digest: &str) -> Result<bool, AuthError>;

    /// Revokes every session of a client. Returns how many were revoked.
    async fn revoke_client(&self, client_id: &str) -> Result<usize, AuthError>;

    /// All sessions that are neither revoked nor expired at `now`.
    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<Session>, AuthError>;

    /// Deletes expired sessions. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError>;
}

/// In-memory store over a concurrent map.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, digest: &str, session: Session) -> Result<(), AuthError> {
        self.sessions.insert(digest.to_string(), session);
        Ok(())
    }

    async fn get(&self, digest: &str) -> Result<Option<Session>, AuthError> {
        Ok(self.sessions.get(digest).map(|s| s.clone()))
    }

    async fn touch(&self, digest: &str, at: DateTime<Utc>) -> Result<(), AuthError> {
        if let Some(mut s) = self.sessions.get_mut(digest) {
            s.last_used_at = at;
        }
        Ok(())
    }

    async fn revoke_digest(&self, digest: &str) -> Result<bool, AuthError> {
        match self.sessions.get_mut(digest) {
            Some(mut s) => {
                s.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_client(&self, client_id: &str) -> Result<usize, AuthError> {
        let mut count = 0;
        for mut entry in self.sessions.iter_mut() {
            if entry.client_id == client_id && !entry.revoked {
                entry.revoked = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<Session>, AuthError> {
        let mut active: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| !s.revoked && !s.is_expired(now))
            .map(|s| s.clone())
            .collect();
        active.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        Ok(active)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(now));
        Ok(before - self.sessions.len())
    }
}

/// SQLite-backed store; one row per session. Uses `spawn_blocking` for all
/// disk work so the executor never blocks on I/O.
pub struct SqliteSessionStore {
    db_path: std::path::PathBuf,
}

impl SqliteSessionStore {
    pub fn new(path: impl AsRef<std::path::Path>) -> Result<Self, AuthError> {
        let db_path = path.as_ref().to_path_buf();
        let conn =
            rusqlite::Connection::open(&db_path).map_err(|e| AuthError::Storage(e.to_string()))?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token_digest TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                client_name TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                last_used_at TEXT NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0
            )
            "#,
            [],
        )
        .map_err(|e| AuthError::Storage(e.to_string()))?;
        Ok(Self { db_path })
    }

    /// Runs one blocking sqlite operation off the executor.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: FnOnce(rusqlite::Connection) -> Result<T, AuthError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| AuthError::Storage(e.to_string()))?;
            op(conn)
        })
        .await
        .map_err(|e| AuthError::Storage(format!("join: {e}")))?
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let role: String = row.get("role")?;
    let parse_ts = |v: String| {
        v.parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
    };
    Ok(Session {
        client_id: row.get("client_id")?,
        client_name: row.get("client_name")?,
        role: role.parse::<Role>().unwrap_or(Role::Viewer),
        created_at: parse_ts(row.get("created_at")?),
        expires_at: parse_ts(row.get("expires_at")?),
        last_used_at: parse_ts(row.get("last_used_at")?),
        revoked: row.get::<_, i64>("revoked")? != 0,
    })
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn insert(&self, digest: &str, session: Session) -> Result<(), AuthError> {
        let digest = digest.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO sessions
                    (token_digest, client_id, client_name, role, created_at, expires_at, last_used_at, revoked)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    digest,
                    session.client_id,
                    session.client_name,
                    session.role.to_string(),
                    session.created_at.to_rfc3339(),
                    session.expires_at.to_rfc3339(),
                    session.last_used_at.to_rfc3339(),
                    session.revoked as i64,
                ],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, digest: &str) -> Result<Option<Session>, AuthError> {
        let digest = digest.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM sessions WHERE token_digest = ?1",
                params![digest],
                row_to_session,
            )
            .optional()
            .map_err(|e| AuthError::Storage(e.to_string()))
        })
        .await
    }

    async fn touch(&self, digest: &str, at: DateTime<Utc>) -> Result<(), AuthError> {
        let digest = digest.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE sessions SET last_used_at = ?2 WHERE token_digest = ?1",
                params![digest, at.to_rfc3339()],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn revoke_digest(&self, digest: &str) -> Result<bool, AuthError> {
        let digest = digest.to_string();
        self.with_conn(move |conn| {
            let n = conn
                .execute(
                    "UPDATE sessions SET revoked = 1 WHERE token_digest = ?1",
                    params![digest],
                )
                .map_err(|e| AuthError::Storage(e.to_string()))?;
            Ok(n > 0)
        })
        .await
    }

    async fn revoke_client(&self, client_id: &str) -> Result<usize, AuthError> {
        let client_id = client_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE sessions SET revoked = 1 WHERE client_id = ?1 AND revoked = 0",
                params![client_id],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))
        })
        .await
    }

    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<Session>, AuthError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM sessions WHERE revoked = 0 AND expires_at > ?1 ORDER BY client_id",
                )
                .map_err(|e| AuthError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![now.to_rfc3339()], row_to_session)
                .map_err(|e| AuthError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| AuthError::Storage(e.to_string()))
        })
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![now.to_rfc3339()],
            )
            .map_err(|e| AuthError::Storage(e.to_string()))
        })
        .await
    }
}
