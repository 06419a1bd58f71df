use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use contrail_core::{SessionToken, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::parse_column;

/// Server-side session row status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Invalidated,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Invalidated => write!(f, "invalidated"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "invalidated" => Ok(Self::Invalidated),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// One authenticated browser session, distinct from the auth platform's
/// own token pair. Created at login, touched on keep-alive, invalidated on
/// logout or a superseding login.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_token: SessionToken,
    pub user_id: UserId,
    pub status: SessionStatus,
    pub last_activity: String,
    pub expires_at: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct SessionRepo {
    db: Database,
}

const SESSION_COLUMNS: &str =
    "session_token, user_id, status, last_activity, expires_at, created_at";

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get the user's live session, or create one. Idempotent: a racing
    /// second call reuses the row the first one inserted.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn ensure_active(
        &self,
        user_id: &UserId,
        ttl_hours: i64,
    ) -> Result<SessionRecord, StoreError> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE user_id = ?1 AND status = 'active' AND expires_at > ?2
                 ORDER BY created_at DESC LIMIT 1"
            ))?;
            let mut rows = stmt.query(rusqlite::params![user_id.as_str(), now_str])?;
            if let Some(row) = rows.next()? {
                return row_to_session(row);
            }

            let token = SessionToken::new();
            let expires_at = (now + Duration::hours(ttl_hours)).to_rfc3339();
            conn.execute(
                "INSERT INTO sessions (session_token, user_id, status, last_activity, expires_at, created_at)
                 VALUES (?1, ?2, 'active', ?3, ?4, ?3)",
                rusqlite::params![token.as_str(), user_id.as_str(), now_str, expires_at],
            )?;

            Ok(SessionRecord {
                session_token: token,
                user_id: user_id.clone(),
                status: SessionStatus::Active,
                last_activity: now_str.clone(),
                expires_at,
                created_at: now_str,
            })
        })
    }

    /// Invalidate every other session for the user: the single-active-
    /// session policy applied at login. Returns the number of rows hit.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn invalidate_others(
        &self,
        user_id: &UserId,
        current_token: &SessionToken,
    ) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET status = 'invalidated'
                 WHERE user_id = ?1 AND session_token != ?2 AND status = 'active'",
                rusqlite::params![user_id.as_str(), current_token.as_str()],
            )?;
            Ok(changed)
        })
    }

    /// Whether the token names a live session. Fail-closed: a store error
    /// reads as invalid.
    pub fn is_valid(&self, token: &SessionToken) -> bool {
        match self.check_valid(token) {
            Ok(valid) => valid,
            Err(e) => {
                warn!(token = %token, "session validity check failed, assuming invalid: {e}");
                false
            }
        }
    }

    fn check_valid(&self, token: &SessionToken) -> Result<bool, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM sessions
                 WHERE session_token = ?1 AND status = 'active' AND expires_at > ?2",
                rusqlite::params![token.as_str(), now],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Keep-alive: bump `last_activity`. Non-critical, so failures are
    /// logged and swallowed.
    pub fn touch(&self, token: &SessionToken) {
        let result = self.db.with_conn(|conn| {
            let _ = conn.execute(
                "UPDATE sessions SET last_activity = ?2 WHERE session_token = ?1",
                rusqlite::params![token.as_str(), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        });
        if let Err(e) = result {
            warn!(token = %token, "session touch failed: {e}");
        }
    }

    /// Invalidate one session (logout).
    #[instrument(skip(self), fields(token = %token))]
    pub fn invalidate(&self, token: &SessionToken) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "UPDATE sessions SET status = 'invalidated' WHERE session_token = ?1",
                [token.as_str()],
            )?;
            Ok(())
        })
    }

    /// Fetch a session row by token.
    pub fn get(&self, token: &SessionToken) -> Result<Option<SessionRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_token = ?1"
            ))?;
            let mut rows = stmt.query([token.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRecord, StoreError> {
    Ok(SessionRecord {
        session_token: SessionToken::from_raw(row.get::<_, String>(0)?),
        user_id: UserId::from_raw(row.get::<_, String>(1)?),
        status: parse_column(row.get(2)?, "status")?,
        last_activity: row.get(3)?,
        expires_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
