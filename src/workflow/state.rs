//! The workflow state vocabulary.
//!
//! States are persisted as opaque text so the vocabulary can evolve without a
//! schema change. [`WorkflowState::decode`] is total: unrecognized text
//! becomes [`WorkflowState::Other`], which the executor reports as a failure
//! outcome rather than a fault.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named point in the renewal workflow graph.
///
/// The canonical sequence is: [`Queued`](Self::Queued) →
/// [`AwaitingFormCaptcha`](Self::AwaitingFormCaptcha) →
/// [`AwaitingOtpCaptcha`](Self::AwaitingOtpCaptcha) →
/// [`AwaitingOtp`](Self::AwaitingOtp) → [`Completed`](Self::Completed), with
/// [`Failed`](Self::Failed) reachable from anywhere. Transitions only move
/// forward, except the rejected-CAPTCHA edges that re-enter the same awaiting
/// state with a fresh challenge.
///
/// # Persistence
///
/// ```rust
/// use renewbot::workflow::WorkflowState;
///
/// let s = WorkflowState::AwaitingOtp;
/// assert_eq!(s.encode(), "AWAITING_OTP");
/// assert_eq!(WorkflowState::decode("AWAITING_OTP"), s);
///
/// // Unknown text survives the round trip instead of erroring.
/// let odd = WorkflowState::decode("AWAITING_BIOMETRICS");
/// assert_eq!(odd.encode(), "AWAITING_BIOMETRICS");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    /// Start symbol: the session is created but no page work has happened.
    Queued,
    /// The renewal form is filled; the first CAPTCHA awaits a human solution.
    AwaitingFormCaptcha,
    /// Details are confirmed; the OTP-generation CAPTCHA awaits a solution.
    AwaitingOtpCaptcha,
    /// An OTP was sent to the user's registered number and awaits relay.
    AwaitingOtp,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
    /// A persisted state this build does not recognize.
    Other(String),
}

impl WorkflowState {
    /// Encode into the persisted string form.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            WorkflowState::Queued => "QUEUED".to_string(),
            WorkflowState::AwaitingFormCaptcha => "AWAITING_FORM_CAPTCHA".to_string(),
            WorkflowState::AwaitingOtpCaptcha => "AWAITING_OTP_CAPTCHA".to_string(),
            WorkflowState::AwaitingOtp => "AWAITING_OTP".to_string(),
            WorkflowState::Completed => "COMPLETED".to_string(),
            WorkflowState::Failed => "FAILED".to_string(),
            WorkflowState::Other(s) => s.clone(),
        }
    }

    /// Decode a persisted string form. Unrecognized input becomes
    /// [`Other`](Self::Other) for forward compatibility.
    pub fn decode(s: &str) -> Self {
        match s {
            "QUEUED" => WorkflowState::Queued,
            "AWAITING_FORM_CAPTCHA" => WorkflowState::AwaitingFormCaptcha,
            "AWAITING_OTP_CAPTCHA" => WorkflowState::AwaitingOtpCaptcha,
            "AWAITING_OTP" => WorkflowState::AwaitingOtp,
            "COMPLETED" => WorkflowState::Completed,
            "FAILED" => WorkflowState::Failed,
            other => WorkflowState::Other(other.to_string()),
        }
    }

    /// Terminal states are absorbing: no outgoing transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed)
    }

    /// The display state persisted while a step for this state is executing,
    /// so external observers see liveness.
    #[must_use]
    pub fn running_marker(&self) -> String {
        format!("RUNNING_{}", self.encode())
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}
