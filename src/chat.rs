//! Chat front-end boundary.
//!
//! Outbound messages go through the [`Notifier`] trait so the core never
//! depends on a particular chat platform. Inbound traffic is routed by
//! [`InboundRouter`], which maps a user's reply onto whichever of their
//! sessions is waiting for input.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::relay::InputRelay;
use crate::store::{SessionStore, StoreError};
use crate::workflow::WorkflowState;

#[derive(Debug, Error, Diagnostic)]
pub enum NotifyError {
    #[error("chat delivery failed: {message}")]
    #[diagnostic(code(renewbot::chat::delivery))]
    Delivery { message: String },
}

/// Outbound chat messages to a user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, user_id: i64, text: &str) -> Result<(), NotifyError>;

    /// Send an image (a CAPTCHA, a confirmation page) with a caption.
    async fn send_image(&self, user_id: i64, path: &Path, caption: &str)
    -> Result<(), NotifyError>;
}

#[derive(Debug, Error, Diagnostic)]
pub enum RouteError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("user {user_id} has no session waiting for input")]
    #[diagnostic(
        code(renewbot::chat::no_waiting_session),
        help("Replies are only consumed while a run is paused on a CAPTCHA or OTP.")
    )]
    NoWaitingSession { user_id: i64 },
}

/// Routes inbound chat traffic onto sessions.
pub struct InboundRouter {
    store: Arc<SessionStore>,
    relay: Arc<InputRelay>,
}

impl InboundRouter {
    pub fn new(store: Arc<SessionStore>, relay: Arc<InputRelay>) -> Self {
        Self { store, relay }
    }

    /// Queue a new renewal run for `user_id`.
    ///
    /// Returns the new session id. A second request while a session is still
    /// open surfaces [`StoreError::SessionAlreadyActive`] for the front-end
    /// to phrase to the user.
    #[instrument(skip(self), err)]
    pub async fn handle_new_run(&self, user_id: i64) -> Result<String, RouteError> {
        let session = self.store.create_session(user_id).await?;
        info!(user_id, session_id = %session.id, "queued renewal session");
        Ok(session.id)
    }

    /// Deliver a free-text reply from `user_id` to their paused session.
    ///
    /// The reply is accepted only when the user's active session is in an
    /// awaiting state and a step is actually parked on the relay; anything
    /// else is reported back so the front-end can tell the user their message
    /// went nowhere.
    #[instrument(skip(self, text), err)]
    pub async fn handle_reply(&self, user_id: i64, text: &str) -> Result<(), RouteError> {
        let session = self
            .store
            .active_session_for_user(user_id)
            .await?
            .ok_or(RouteError::NoWaitingSession { user_id })?;

        let awaiting = matches!(
            WorkflowState::decode(&session.state),
            WorkflowState::AwaitingFormCaptcha
                | WorkflowState::AwaitingOtpCaptcha
                | WorkflowState::AwaitingOtp
        );
        if !awaiting || !self.relay.is_waiting(&session.id) {
            warn!(user_id, session_id = %session.id, state = %session.state,
                "dropping reply: session is not paused for input");
            return Err(RouteError::NoWaitingSession { user_id });
        }

        self.relay.put(&session.id, text.trim().to_string());
        Ok(())
    }

    /// A short human-readable status line for the user's latest session.
    #[instrument(skip(self), err)]
    pub async fn handle_status(&self, user_id: i64) -> Result<String, RouteError> {
        match self.store.active_session_for_user(user_id).await? {
            Some(session) => Ok(format!(
                "Session {} is in state {}.",
                session.id, session.state
            )),
            None => Ok("No renewal session is currently running.".to_string()),
        }
    }
}
