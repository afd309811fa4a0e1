//! Row types and small persisted vocabularies.
//!
//! Enumerated columns are stored as opaque text with total decoders, the same
//! treatment [`WorkflowState`](crate::workflow::WorkflowState) gets, so old
//! rows never make the store unreadable.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A registered user with the personal data the renewal form needs.
///
/// `license_no` is plaintext here; it is encrypted by the store on the way in
/// and decrypted on the way out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: i64,
    pub license_no: String,
    pub date_of_birth: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Terminal verdict of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionResult {
    Success,
    Failed,
}

impl SessionResult {
    #[must_use]
    pub fn encode(self) -> &'static str {
        match self {
            SessionResult::Success => "SUCCESS",
            SessionResult::Failed => "FAILED",
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(SessionResult::Success),
            "FAILED" => Some(SessionResult::Failed),
            _ => None,
        }
    }
}

/// One renewal attempt as persisted.
///
/// `state` stays textual at this layer; callers that need the typed form
/// decode it with [`WorkflowState::decode`](crate::workflow::WorkflowState::decode),
/// which also accepts the transient `RUNNING_*` display markers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: i64,
    pub state: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result: Option<SessionResult>,
    pub reason: Option<String>,
}

impl SessionRecord {
    /// A session is closed iff it carries a result; `ended_at` and `reason`
    /// ride along with it.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.result.is_some()
    }
}

/// Severity of a session log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn encode(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn decode(s: &str) -> Self {
        match s {
            "DEBUG" => LogLevel::Debug,
            "WARN" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// An append-only audit line attached to a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEvent {
    pub id: i64,
    pub session_id: String,
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// What a stored file is evidence of.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// A CAPTCHA image captured for the user to solve.
    CaptchaImage,
    /// The final confirmation page after a successful submission.
    FinalConfirmation,
    /// A best-effort snapshot taken when a step failed.
    FailureSnapshot,
    Other(String),
}

impl ArtifactKind {
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            ArtifactKind::CaptchaImage => "CAPTCHA_IMAGE".to_string(),
            ArtifactKind::FinalConfirmation => "FINAL_CONFIRMATION".to_string(),
            ArtifactKind::FailureSnapshot => "FAILURE_SNAPSHOT".to_string(),
            ArtifactKind::Other(s) => s.clone(),
        }
    }

    pub fn decode(s: &str) -> Self {
        match s {
            "CAPTCHA_IMAGE" => ArtifactKind::CaptchaImage,
            "FINAL_CONFIRMATION" => ArtifactKind::FinalConfirmation,
            "FAILURE_SNAPSHOT" => ArtifactKind::FailureSnapshot,
            other => ArtifactKind::Other(other.to_string()),
        }
    }
}

/// A file on disk referenced from a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub id: i64,
    pub session_id: String,
    pub kind: ArtifactKind,
    pub path: String,
    pub created_at: DateTime<Utc>,
}
