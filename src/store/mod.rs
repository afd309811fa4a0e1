/*!
SQLite-backed persistence for users, sessions, logs, and artifacts.

The store is the single source of truth for session state. Connecting runs
the embedded migrations (`sqlx::migrate!("./migrations")`), so a fresh
database file is usable immediately.

Timestamps are stored as RFC 3339 text. Dates of birth are stored as
`YYYY-MM-DD` text. The license number column holds the
`nonce_b64:ciphertext_b64` form produced by [`FieldCipher`]; callers only
ever see plaintext.
*/

pub mod models;

use chrono::{DateTime, NaiveDate, Utc};
use miette::Diagnostic;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::crypto::{CryptoError, FieldCipher};
use models::{
    ArtifactKind, ArtifactRecord, LogEvent, LogLevel, SessionRecord, SessionResult, UserProfile,
};

const DOB_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("database error: {message}")]
    #[diagnostic(
        code(renewbot::store::backend),
        help("Ensure the SQLite database URL is valid and writable.")
    )]
    Backend { message: String },

    #[error("no user registered with id {user_id}")]
    #[diagnostic(code(renewbot::store::unknown_user))]
    UnknownUser { user_id: i64 },

    #[error("no session with id {session_id}")]
    #[diagnostic(code(renewbot::store::unknown_session))]
    UnknownSession { session_id: String },

    #[error("user {user_id} already has an active session ({session_id})")]
    #[diagnostic(
        code(renewbot::store::active_session),
        help("Wait for the running session to finish before starting another.")
    )]
    SessionAlreadyActive { user_id: i64, session_id: String },

    #[error("stored row is corrupt: {message}")]
    #[diagnostic(code(renewbot::store::corrupt))]
    Corrupt { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Crypto(#[from] CryptoError),
}

fn backend(context: &str, e: sqlx::Error) -> StoreError {
    StoreError::Backend {
        message: format!("{context}: {e}"),
    }
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            message: format!("{column} is not RFC 3339 ({raw:?}): {e}"),
        })
}

/// Shared handle to the session database.
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
    cipher: FieldCipher,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish()
    }
}

impl SessionStore {
    /// Connect (or create) the database at `database_url` and apply embedded
    /// migrations. Example URL: `sqlite://renewbot.db`.
    #[instrument(skip(database_url, cipher))]
    pub async fn connect(database_url: &str, cipher: FieldCipher) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| backend("connect", e))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("migration failure: {e}"),
            })?;
        Ok(Self { pool, cipher })
    }

    /// Register a user or replace their stored details. The license number is
    /// encrypted before it touches the database.
    #[instrument(skip(self, license_no), err)]
    pub async fn upsert_user(
        &self,
        user_id: i64,
        license_no: &str,
        date_of_birth: NaiveDate,
    ) -> Result<(), StoreError> {
        let license_enc = self.cipher.encrypt(license_no)?;
        sqlx::query(
            r#"
            INSERT INTO users (user_id, license_no_enc, date_of_birth, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO UPDATE SET
                license_no_enc = excluded.license_no_enc,
                date_of_birth = excluded.date_of_birth
            "#,
        )
        .bind(user_id)
        .bind(&license_enc)
        .bind(date_of_birth.format(DOB_FORMAT).to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| backend("upsert user", e))?;
        Ok(())
    }

    /// Load a user's profile with the license number decrypted.
    #[instrument(skip(self), err)]
    pub async fn get_user(&self, user_id: i64) -> Result<UserProfile, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, license_no_enc, date_of_birth, created_at FROM users WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("select user", e))?
        .ok_or(StoreError::UnknownUser { user_id })?;

        let license_enc: String = row.get("license_no_enc");
        let dob_raw: String = row.get("date_of_birth");
        let created_raw: String = row.get("created_at");

        let date_of_birth =
            NaiveDate::parse_from_str(&dob_raw, DOB_FORMAT).map_err(|e| StoreError::Corrupt {
                message: format!("date_of_birth is not {DOB_FORMAT} ({dob_raw:?}): {e}"),
            })?;

        Ok(UserProfile {
            user_id,
            license_no: self.cipher.decrypt(&license_enc)?,
            date_of_birth,
            created_at: parse_timestamp(&created_raw, "created_at")?,
        })
    }

    /// Create a queued session for `user_id`.
    ///
    /// One active (non-closed) session per user is enforced here, so a second
    /// "start renewal" while one is running is rejected rather than queued.
    #[instrument(skip(self), err)]
    pub async fn create_session(&self, user_id: i64) -> Result<SessionRecord, StoreError> {
        // Confirm the user exists so sessions never dangle.
        self.get_user(user_id).await?;

        if let Some(active) = self.active_session_for_user(user_id).await? {
            return Err(StoreError::SessionAlreadyActive {
                user_id,
                session_id: active.id,
            });
        }

        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            user_id,
            state: crate::workflow::WorkflowState::Queued.encode(),
            started_at: Utc::now(),
            ended_at: None,
            result: None,
            reason: None,
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, state, started_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&record.id)
        .bind(record.user_id)
        .bind(&record.state)
        .bind(record.started_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(record),
            // A concurrent creation can slip past the check above; the
            // partial unique index on open sessions catches it here.
            Err(e) if e
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation()) =>
            {
                let active = self.active_session_for_user(user_id).await?;
                Err(StoreError::SessionAlreadyActive {
                    user_id,
                    session_id: active.map(|s| s.id).unwrap_or_default(),
                })
            }
            Err(e) => Err(backend("insert session", e)),
        }
    }

    /// Load one session by id.
    #[instrument(skip(self), err)]
    pub async fn session(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, state, started_at, ended_at, result, reason FROM sessions WHERE id = ?1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("select session", e))?
        .ok_or_else(|| StoreError::UnknownSession {
            session_id: session_id.to_string(),
        })?;

        session_from_row(&row)
    }

    /// All sessions still waiting to be picked up, oldest first.
    #[instrument(skip(self), err)]
    pub async fn queued_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, state, started_at, ended_at, result, reason
            FROM sessions
            WHERE state = 'QUEUED'
            ORDER BY started_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend("select queued", e))?;

        rows.iter().map(session_from_row).collect()
    }

    /// The user's open session, if any. Closed sessions carry a result.
    #[instrument(skip(self), err)]
    pub async fn active_session_for_user(
        &self,
        user_id: i64,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, state, started_at, ended_at, result, reason
            FROM sessions
            WHERE user_id = ?1 AND result IS NULL
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("select active session", e))?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// Persist a state (or `RUNNING_*` display marker) for an open session.
    #[instrument(skip(self), err)]
    pub async fn set_state(&self, session_id: &str, state: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE sessions SET state = ?1 WHERE id = ?2")
            .bind(state)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| backend("update state", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownSession {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    /// Close a session: terminal state, result, reason, and end time are
    /// written together so a closed row is always fully populated.
    #[instrument(skip(self, reason), err)]
    pub async fn finish_session(
        &self,
        session_id: &str,
        result: SessionResult,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let terminal_state = match result {
            SessionResult::Success => crate::workflow::WorkflowState::Completed,
            SessionResult::Failed => crate::workflow::WorkflowState::Failed,
        };
        let updated = sqlx::query(
            r#"
            UPDATE sessions
            SET state = ?1, result = ?2, reason = ?3, ended_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(terminal_state.encode())
        .bind(result.encode())
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("finish session", e))?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::UnknownSession {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    /// Append an audit line to a session's log.
    #[instrument(skip(self, message), err)]
    pub async fn log_event(
        &self,
        session_id: &str,
        level: LogLevel,
        message: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO session_logs (session_id, at, level, message) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(session_id)
        .bind(Utc::now().to_rfc3339())
        .bind(level.encode())
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("insert log", e))?;
        Ok(())
    }

    /// Record a file artifact for a session.
    #[instrument(skip(self), err)]
    pub async fn add_artifact(
        &self,
        session_id: &str,
        kind: &ArtifactKind,
        path: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO artifacts (session_id, kind, path, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(session_id)
        .bind(kind.encode())
        .bind(path)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| backend("insert artifact", e))?;
        Ok(())
    }

    /// A session's log lines in insertion order.
    #[instrument(skip(self), err)]
    pub async fn logs_for_session(&self, session_id: &str) -> Result<Vec<LogEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, session_id, at, level, message FROM session_logs WHERE session_id = ?1 ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend("select logs", e))?;

        rows.iter()
            .map(|row| {
                let at_raw: String = row.get("at");
                let level_raw: String = row.get("level");
                Ok(LogEvent {
                    id: row.get("id"),
                    session_id: row.get("session_id"),
                    at: parse_timestamp(&at_raw, "at")?,
                    level: LogLevel::decode(&level_raw),
                    message: row.get("message"),
                })
            })
            .collect()
    }

    /// A session's artifacts in insertion order.
    #[instrument(skip(self), err)]
    pub async fn artifacts_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<ArtifactRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, session_id, kind, path, created_at FROM artifacts WHERE session_id = ?1 ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend("select artifacts", e))?;

        rows.iter()
            .map(|row| {
                let kind_raw: String = row.get("kind");
                let created_raw: String = row.get("created_at");
                Ok(ArtifactRecord {
                    id: row.get("id"),
                    session_id: row.get("session_id"),
                    kind: ArtifactKind::decode(&kind_raw),
                    path: row.get("path"),
                    created_at: parse_timestamp(&created_raw, "created_at")?,
                })
            })
            .collect()
    }
}

fn session_from_row(row: &SqliteRow) -> Result<SessionRecord, StoreError> {
    let started_raw: String = row.get("started_at");
    let ended_raw: Option<String> = row.get("ended_at");
    let result_raw: Option<String> = row.get("result");

    let result = match result_raw {
        Some(raw) => Some(
            SessionResult::decode(&raw).ok_or_else(|| StoreError::Corrupt {
                message: format!("unrecognized session result {raw:?}"),
            })?,
        ),
        None => None,
    };

    Ok(SessionRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        state: row.get("state"),
        started_at: parse_timestamp(&started_raw, "started_at")?,
        ended_at: ended_raw
            .as_deref()
            .map(|raw| parse_timestamp(raw, "ended_at"))
            .transpose()?,
        result,
        reason: row.get("reason"),
    })
}
