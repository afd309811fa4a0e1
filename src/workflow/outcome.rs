//! Structured results of executing one workflow step.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::state::WorkflowState;

/// What the human must see before they can answer a paused step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptKind {
    /// A CAPTCHA challenge captured from the portal.
    Captcha { image: PathBuf },
    /// A one-time passcode sent to the user's registered mobile number.
    Otp,
}

/// Payload delivered to the human when a step pauses for input.
///
/// Serializable so the pause can be journaled to the session log as a
/// structured payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPrompt {
    #[serde(flatten)]
    pub kind: PromptKind,
    /// Optional hint of which portal field the reply ultimately targets.
    pub field_hint: Option<String>,
}

impl InputPrompt {
    pub fn captcha(image: PathBuf, field_hint: impl Into<String>) -> Self {
        Self {
            kind: PromptKind::Captcha { image },
            field_hint: Some(field_hint.into()),
        }
    }

    pub fn otp() -> Self {
        Self {
            kind: PromptKind::Otp,
            field_hint: None,
        }
    }
}

/// Outcome of one step-executor invocation.
///
/// The executor is stateless between invocations; everything the
/// orchestrator needs to persist or act on is carried here.
#[derive(Clone, Debug)]
pub enum StepOutcome {
    /// Deterministic auto-advance; no human involvement.
    Continue { next: WorkflowState },
    /// The step needs a human reply before the workflow can resume.
    /// `retry` marks a re-prompt after a rejected answer (fresh challenge,
    /// same logical state).
    PauseForInput {
        next: WorkflowState,
        prompt: InputPrompt,
        retry: bool,
    },
    /// Terminal success, with the final confirmation artifact when captured.
    Success { artifact: Option<PathBuf> },
    /// Non-recoverable failure at this layer. `artifact` is a best-effort
    /// snapshot of the external surface at the moment of failure.
    Failure {
        reason: String,
        artifact: Option<PathBuf>,
    },
}

impl StepOutcome {
    /// Coarse classification used by idempotence checks and logs.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            StepOutcome::Continue { .. } => "continue",
            StepOutcome::PauseForInput { .. } => "pause",
            StepOutcome::Success { .. } => "success",
            StepOutcome::Failure { .. } => "failure",
        }
    }
}
