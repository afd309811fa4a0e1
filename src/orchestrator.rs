//! Per-session driving loop.
//!
//! One orchestrator task owns one session from claim to close: it loads the
//! persisted state, executes steps, pauses on the relay when a step needs a
//! human, and writes exactly one terminal record and exactly one terminal
//! notification no matter how the run ends.
//!
//! Internal errors (store, driver, relay misuse) are caught at the `run`
//! boundary and converted into a failed session rather than a crashed task.

use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::browser::{BrowserDriver, BrowserPage, DriverError};
use crate::chat::Notifier;
use crate::relay::{InputRelay, RelayError};
use crate::store::models::{LogLevel, SessionResult, UserProfile};
use crate::store::{SessionStore, StoreError};
use crate::workflow::{InputPrompt, PromptKind, StepExecutor, StepOutcome, WorkflowState};

#[derive(Debug, Error, Diagnostic)]
pub enum OrchestratorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Relay(#[from] RelayError),
}

/// Drives sessions through the workflow, one task per session.
pub struct Orchestrator {
    store: Arc<SessionStore>,
    relay: Arc<InputRelay>,
    notifier: Arc<dyn Notifier>,
    executor: Arc<dyn StepExecutor>,
    driver: Arc<dyn BrowserDriver>,
    input_timeout: Duration,
    captcha_retry_limit: u32,
}

impl Orchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        relay: Arc<InputRelay>,
        notifier: Arc<dyn Notifier>,
        executor: Arc<dyn StepExecutor>,
        driver: Arc<dyn BrowserDriver>,
        input_timeout: Duration,
        captcha_retry_limit: u32,
    ) -> Self {
        Self {
            store,
            relay,
            notifier,
            executor,
            driver,
            input_timeout,
            captcha_retry_limit,
        }
    }

    /// Run one session to a terminal state.
    ///
    /// This is the error boundary: whatever `drive` returns, the session ends
    /// closed, the user ends notified, and the relay slot ends discarded.
    #[instrument(skip(self))]
    pub async fn run(&self, session_id: &str) {
        if let Err(e) = self.drive(session_id).await {
            error!(session_id, error = %e, "session run aborted on internal error");
            match self.store.session(session_id).await {
                Ok(session) if !session.is_closed() => {
                    if let Err(e) = self
                        .store
                        .finish_session(
                            session_id,
                            SessionResult::Failed,
                            Some("internal error while driving the session"),
                        )
                        .await
                    {
                        error!(session_id, error = %e, "could not close session after internal error");
                    }
                    self.notify_text(
                        session.user_id,
                        "Something went wrong on our side and the renewal attempt was stopped. \
                         You can start a new one.",
                    )
                    .await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(session_id, error = %e, "could not load session after internal error");
                }
            }
        }
        self.relay.discard(session_id);
    }

    async fn drive(&self, session_id: &str) -> Result<(), OrchestratorError> {
        let session = self.store.session(session_id).await?;
        let state = WorkflowState::decode(&session.state);
        if state.is_terminal() {
            warn!(session_id, %state, "asked to run an already-terminal session");
            return Ok(());
        }
        let profile = self.store.get_user(session.user_id).await?;

        let page = self.driver.new_page(session_id).await?;
        let result = self
            .step_loop(page.as_ref(), session_id, &profile, state)
            .await;
        // The page is released on every exit path, including step failures.
        page.close().await;
        result
    }

    async fn step_loop(
        &self,
        page: &dyn BrowserPage,
        session_id: &str,
        profile: &UserProfile,
        mut state: WorkflowState,
    ) -> Result<(), OrchestratorError> {
        let user_id = profile.user_id;
        let mut input: Option<String> = None;
        // Rejected-challenge counts, keyed by the awaiting state they re-enter.
        let mut rejections: FxHashMap<String, u32> = FxHashMap::default();

        while !state.is_terminal() {
            self.store
                .set_state(session_id, &state.running_marker())
                .await?;
            let outcome = self
                .executor
                .execute_step(page, session_id, profile, &state, input.as_deref())
                .await;
            input = None;
            info!(session_id, %state, outcome = outcome.class(), "step finished");

            match outcome {
                StepOutcome::Continue { next } => {
                    self.store.set_state(session_id, &next.encode()).await?;
                    state = next;
                }
                StepOutcome::PauseForInput {
                    next,
                    prompt,
                    retry,
                } => {
                    if retry {
                        let count = rejections.entry(next.encode()).or_insert(0);
                        *count += 1;
                        if *count >= self.captcha_retry_limit {
                            self.close_out(
                                session_id,
                                user_id,
                                SessionResult::Failed,
                                &format!("too many rejected CAPTCHA answers in {next}"),
                                None,
                            )
                            .await?;
                            return Ok(());
                        }
                    }
                    self.store.set_state(session_id, &next.encode()).await?;
                    self.journal_pause(session_id, &next, &prompt).await;
                    self.send_prompt(user_id, &prompt, retry).await;

                    match self.relay.take(session_id, self.input_timeout).await {
                        Ok(value) => {
                            input = Some(value);
                            state = next;
                        }
                        Err(RelayError::TimedOut { .. }) => {
                            self.close_out(
                                session_id,
                                user_id,
                                SessionResult::Failed,
                                &format!("timeout awaiting input in {next}"),
                                None,
                            )
                            .await?;
                            return Ok(());
                        }
                        Err(e @ RelayError::AlreadyWaiting { .. }) => return Err(e.into()),
                    }
                }
                StepOutcome::Success { artifact } => {
                    self.close_out(
                        session_id,
                        user_id,
                        SessionResult::Success,
                        "renewal application submitted",
                        artifact.as_deref(),
                    )
                    .await?;
                    return Ok(());
                }
                StepOutcome::Failure { reason, artifact } => {
                    self.close_out(
                        session_id,
                        user_id,
                        SessionResult::Failed,
                        &reason,
                        artifact.as_deref(),
                    )
                    .await?;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Close the session and send the single terminal notification.
    async fn close_out(
        &self,
        session_id: &str,
        user_id: i64,
        result: SessionResult,
        reason: &str,
        artifact: Option<&std::path::Path>,
    ) -> Result<(), OrchestratorError> {
        self.store
            .finish_session(session_id, result, Some(reason))
            .await?;
        info!(session_id, result = result.encode(), reason, "session closed");

        let text = match result {
            SessionResult::Success => {
                "Your DL renewal application was submitted successfully.".to_string()
            }
            SessionResult::Failed => format!("Your renewal attempt failed: {reason}."),
        };
        match artifact {
            Some(path) => {
                if let Err(e) = self.notifier.send_image(user_id, path, &text).await {
                    warn!(user_id, error = %e, "terminal notification failed, retrying as text");
                    self.notify_text(user_id, &text).await;
                }
            }
            None => self.notify_text(user_id, &text).await,
        }
        Ok(())
    }

    /// Journal the pause to the session log with the prompt as a structured
    /// JSON payload. Best-effort, like all session log writes.
    async fn journal_pause(&self, session_id: &str, next: &WorkflowState, prompt: &InputPrompt) {
        let payload =
            serde_json::to_string(prompt).unwrap_or_else(|_| "\"unserializable\"".to_string());
        if let Err(e) = self
            .store
            .log_event(
                session_id,
                LogLevel::Info,
                &format!("paused in {next} awaiting input: {payload}"),
            )
            .await
        {
            warn!(session_id, error = %e, "failed to journal pause");
        }
    }

    async fn send_prompt(&self, user_id: i64, prompt: &InputPrompt, retry: bool) {
        match &prompt.kind {
            PromptKind::Captcha { image } => {
                let caption = if retry {
                    "That answer was rejected. Please solve this fresh CAPTCHA and reply with the text."
                } else {
                    "Please solve this CAPTCHA and reply with the text."
                };
                if let Err(e) = self.notifier.send_image(user_id, image, caption).await {
                    warn!(user_id, error = %e, "failed to deliver CAPTCHA prompt");
                }
            }
            PromptKind::Otp => {
                self.notify_text(
                    user_id,
                    "An OTP has been sent to your registered mobile number. Reply with the code.",
                )
                .await;
            }
        }
    }

    /// Chat delivery is best-effort; the session record stays authoritative.
    async fn notify_text(&self, user_id: i64, text: &str) {
        if let Err(e) = self.notifier.send_text(user_id, text).await {
            warn!(user_id, error = %e, "failed to deliver chat message");
        }
    }
}
