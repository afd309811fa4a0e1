//! Portal-specific step bodies behind the [`StepExecutor`] seam.
//!
//! Each invocation performs exactly one workflow step against the page it is
//! given and reports a [`StepOutcome`]. The executor holds no per-session
//! state; rejected-challenge bookkeeping lives in the orchestrator.
//!
//! Element lookups use Playwright-style selector strings (`role=`, `text=`,
//! CSS) which the driver behind [`BrowserPage`] resolves.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::browser::{BrowserPage, DriverError};
use crate::store::SessionStore;
use crate::store::models::{ArtifactKind, LogLevel, UserProfile};

use super::outcome::{InputPrompt, StepOutcome};
use super::state::WorkflowState;

// Portal element handles, captured from a recorded walkthrough of the
// renewal flow.
const SEL_POPUP_CLOSE: &str = "label=Close";
const SEL_STATE_SELECT: &str = "#stfNameId";
const SEL_RENEWAL_LINK: &str = r#"role=link[name="Apply for DL Renewal"]"#;
const SEL_CONTINUE: &str = r#"role=button[name="Continue"]"#;
const SEL_DL_NUMBER: &str = r#"role=textbox[name="DL number"]"#;
const SEL_DOB: &str = r#"role=textbox[name="DD-MM-YYYY"]"#;
const SEL_CAPTCHA_IMG: &str = r#"role=img[name="Click Here to Refresh Captcha"]"#;
const SEL_CAPTCHA_FIELD: &str = r#"role=textbox[name="Enter Captcha Here"]"#;
const SEL_PRIVACY_CHECK: &str = "#PrivacyPolicyTermsofService";
const SEL_GET_DETAILS: &str = r#"role=button[name="Get DL Details"]"#;
const SEL_INVALID_CAPTCHA: &str = "text=/Invalid Captcha/";
const SEL_DISPLAY_DETAILS: &str = "#dispDLDet";
const SEL_RTO_SELECT: &str = "#rtoCodeDLTr";
const SEL_PROCEED: &str = r#"role=button[name="Proceed"]"#;
const SEL_CONFIRM: &str = r#"role=button[name="Confirm"]"#;
const SEL_OTP_CAPTCHA_FIELD: &str = r#"role=textbox[name="Enter Captcha"]"#;
const SEL_GENERATE_OTP: &str = r#"role=button[name="Generate OTP"]"#;
const SEL_OTP_SENT: &str = "text=/OTP has been sent/";
const SEL_OTP_FIELD: &str = "#otpNumberSarathi";
const SEL_SUBMIT_OTP: &str = r#"role=button[name="Submit OTP"]"#;
const SEL_TRANSACTION: &str = "#trsaction_dlc";
const SEL_TRANSACTION_ROW: &str = "div:nth-child(3) > div:nth-child(3) > #trsaction_dlc";

const NAV_TIMEOUT: Duration = Duration::from_secs(60);
const ACTION_TIMEOUT: Duration = Duration::from_secs(30);
const POPUP_TIMEOUT: Duration = Duration::from_secs(5);
const INVALID_CAPTCHA_TIMEOUT: Duration = Duration::from_secs(5);
const OTP_SENT_TIMEOUT: Duration = Duration::from_secs(10);
const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(15);

// Transient-timeout retry policy for individual actions.
const ACTION_ATTEMPTS: u32 = 3;
const ACTION_BACKOFF: Duration = Duration::from_millis(250);

/// One unit of workflow progress against a live page.
///
/// Implementations must be stateless between invocations: the persisted
/// session state plus the optional human input fully determine the step.
/// Failures are reported in-band as [`StepOutcome::Failure`], never panics.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute_step(
        &self,
        page: &dyn BrowserPage,
        session_id: &str,
        profile: &UserProfile,
        state: &WorkflowState,
        input: Option<&str>,
    ) -> StepOutcome;
}

/// The production executor for the Sarathi DL-renewal flow.
pub struct RenewalStepExecutor {
    store: Arc<SessionStore>,
    portal_url: String,
    state_code: String,
    rto_code: String,
    artifacts_dir: PathBuf,
}

impl RenewalStepExecutor {
    pub fn new(
        store: Arc<SessionStore>,
        portal_url: impl Into<String>,
        state_code: impl Into<String>,
        rto_code: impl Into<String>,
        artifacts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            portal_url: portal_url.into(),
            state_code: state_code.into(),
            rto_code: rto_code.into(),
            artifacts_dir: artifacts_dir.into(),
        }
    }

    /// Session log line that must never abort the step it annotates.
    async fn log(&self, session_id: &str, level: LogLevel, message: &str) {
        if let Err(e) = self.store.log_event(session_id, level, message).await {
            warn!(session_id, error = %e, "failed to persist session log line");
        }
    }

    fn artifact_path(&self, session_id: &str, name: &str) -> PathBuf {
        self.artifacts_dir.join(session_id).join(name)
    }

    /// Screenshot one element, record it as an artifact, and return its path.
    async fn capture_element(
        &self,
        page: &dyn BrowserPage,
        session_id: &str,
        selector: &str,
        name: &str,
        kind: ArtifactKind,
    ) -> Result<PathBuf, DriverError> {
        let path = self.artifact_path(session_id, name);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| DriverError::Action {
                what: name.to_string(),
                message: format!("create artifact dir: {e}"),
            })?;
        }
        page.screenshot_element(selector, &path, ACTION_TIMEOUT)
            .await?;
        self.record_artifact(session_id, &kind, &path).await;
        Ok(path)
    }

    /// Full-page variant of [`capture_element`](Self::capture_element).
    async fn capture_page(
        &self,
        page: &dyn BrowserPage,
        session_id: &str,
        name: &str,
        kind: ArtifactKind,
    ) -> Result<PathBuf, DriverError> {
        let path = self.artifact_path(session_id, name);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| DriverError::Action {
                what: name.to_string(),
                message: format!("create artifact dir: {e}"),
            })?;
        }
        page.screenshot_page(&path).await?;
        self.record_artifact(session_id, &kind, &path).await;
        Ok(path)
    }

    async fn record_artifact(&self, session_id: &str, kind: &ArtifactKind, path: &Path) {
        let path_str = path.to_string_lossy();
        if let Err(e) = self.store.add_artifact(session_id, kind, &path_str).await {
            warn!(session_id, error = %e, "failed to record artifact row");
        }
        self.log(
            session_id,
            LogLevel::Info,
            &format!("saved artifact {path_str}"),
        )
        .await;
    }

    /// Best-effort failure snapshot. Never masks the failure it documents.
    async fn capture_failure(&self, page: &dyn BrowserPage, session_id: &str) -> Option<PathBuf> {
        match self
            .capture_page(page, session_id, "failure.png", ArtifactKind::FailureSnapshot)
            .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(session_id, error = %e, "failure snapshot could not be captured");
                None
            }
        }
    }

    /// Retry an action a few times when the only problem is a timeout.
    /// Non-timeout errors and exhausted retries propagate.
    async fn retrying<F, Fut>(&self, session_id: &str, what: &str, f: F) -> Result<(), DriverError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), DriverError>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_timeout() && attempt < ACTION_ATTEMPTS => {
                    self.log(
                        session_id,
                        LogLevel::Warn,
                        &format!("{what} timed out (attempt {attempt}), retrying"),
                    )
                    .await;
                    tokio::time::sleep(ACTION_BACKOFF).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Navigate to the renewal form, fill in the user's details, and capture
    /// the first CAPTCHA.
    async fn begin(
        &self,
        page: &dyn BrowserPage,
        session_id: &str,
        profile: &UserProfile,
    ) -> Result<StepOutcome, DriverError> {
        self.log(session_id, LogLevel::Info, "navigating to portal")
            .await;
        page.goto(&self.portal_url, NAV_TIMEOUT).await?;

        // An informational popup appears intermittently; absence is fine.
        if page.click(SEL_POPUP_CLOSE, POPUP_TIMEOUT).await.is_err() {
            self.log(session_id, LogLevel::Debug, "no landing popup to dismiss")
                .await;
        }

        self.retrying(session_id, "state selection", || {
            page.select_option(SEL_STATE_SELECT, &self.state_code, ACTION_TIMEOUT)
        })
        .await?;
        self.retrying(session_id, "renewal link", || {
            page.click(SEL_RENEWAL_LINK, ACTION_TIMEOUT)
        })
        .await?;
        self.retrying(session_id, "continue button", || {
            page.click(SEL_CONTINUE, ACTION_TIMEOUT)
        })
        .await?;

        let dob = profile.date_of_birth.format("%d-%m-%Y").to_string();
        self.retrying(session_id, "license number field", || {
            page.fill(SEL_DL_NUMBER, &profile.license_no, ACTION_TIMEOUT)
        })
        .await?;
        self.retrying(session_id, "date of birth field", || {
            page.fill(SEL_DOB, &dob, ACTION_TIMEOUT)
        })
        .await?;

        let captcha = self
            .capture_element(
                page,
                session_id,
                SEL_CAPTCHA_IMG,
                "captcha_form.png",
                ArtifactKind::CaptchaImage,
            )
            .await?;
        self.log(session_id, LogLevel::Info, "form filled, awaiting CAPTCHA")
            .await;

        Ok(StepOutcome::PauseForInput {
            next: WorkflowState::AwaitingFormCaptcha,
            prompt: InputPrompt::captcha(captcha, "Enter Captcha Here"),
            retry: false,
        })
    }

    /// Submit the form CAPTCHA, confirm the fetched license details, and
    /// capture the OTP-generation CAPTCHA.
    async fn submit_form_captcha(
        &self,
        page: &dyn BrowserPage,
        session_id: &str,
        input: &str,
    ) -> Result<StepOutcome, DriverError> {
        self.retrying(session_id, "captcha field", || {
            page.fill(SEL_CAPTCHA_FIELD, input, ACTION_TIMEOUT)
        })
        .await?;
        page.check(SEL_PRIVACY_CHECK, ACTION_TIMEOUT).await?;
        self.retrying(session_id, "get details button", || {
            page.click(SEL_GET_DETAILS, ACTION_TIMEOUT)
        })
        .await?;

        // A rejection banner appears quickly; if it never shows, the answer
        // was accepted.
        match page
            .wait_for_selector(SEL_INVALID_CAPTCHA, INVALID_CAPTCHA_TIMEOUT)
            .await
        {
            Ok(()) => {
                self.log(session_id, LogLevel::Warn, "CAPTCHA rejected by portal")
                    .await;
                // Clicking the image refreshes the challenge.
                page.click(SEL_CAPTCHA_IMG, ACTION_TIMEOUT).await?;
                tokio::time::sleep(Duration::from_secs(1)).await;
                let captcha = self
                    .capture_element(
                        page,
                        session_id,
                        SEL_CAPTCHA_IMG,
                        "captcha_form_retry.png",
                        ArtifactKind::CaptchaImage,
                    )
                    .await?;
                return Ok(StepOutcome::PauseForInput {
                    next: WorkflowState::AwaitingFormCaptcha,
                    prompt: InputPrompt::captcha(captcha, "Enter Captcha Here"),
                    retry: true,
                });
            }
            Err(e) if e.is_timeout() => {}
            Err(e) => return Err(e),
        }

        self.log(session_id, LogLevel::Info, "license details fetched")
            .await;
        self.retrying(session_id, "display details", || {
            page.select_option(SEL_DISPLAY_DETAILS, "YES", ACTION_TIMEOUT)
        })
        .await?;
        self.retrying(session_id, "RTO selection", || {
            page.select_option(SEL_RTO_SELECT, &self.rto_code, ACTION_TIMEOUT)
        })
        .await?;
        self.retrying(session_id, "proceed button", || {
            page.click(SEL_PROCEED, ACTION_TIMEOUT)
        })
        .await?;
        self.retrying(session_id, "confirm button", || {
            page.click(SEL_CONFIRM, ACTION_TIMEOUT)
        })
        .await?;

        let captcha = self
            .capture_element(
                page,
                session_id,
                SEL_CAPTCHA_IMG,
                "captcha_otp.png",
                ArtifactKind::CaptchaImage,
            )
            .await?;
        self.log(
            session_id,
            LogLevel::Info,
            "details confirmed, awaiting OTP CAPTCHA",
        )
        .await;

        Ok(StepOutcome::PauseForInput {
            next: WorkflowState::AwaitingOtpCaptcha,
            prompt: InputPrompt::captcha(captcha, "Enter Captcha"),
            retry: false,
        })
    }

    /// Submit the OTP-generation CAPTCHA and trigger OTP dispatch.
    async fn submit_otp_captcha(
        &self,
        page: &dyn BrowserPage,
        session_id: &str,
        input: &str,
    ) -> Result<StepOutcome, DriverError> {
        self.retrying(session_id, "OTP captcha field", || {
            page.fill(SEL_OTP_CAPTCHA_FIELD, input, ACTION_TIMEOUT)
        })
        .await?;
        self.retrying(session_id, "generate OTP button", || {
            page.click(SEL_GENERATE_OTP, ACTION_TIMEOUT)
        })
        .await?;

        match page.wait_for_selector(SEL_OTP_SENT, OTP_SENT_TIMEOUT).await {
            Ok(()) => {
                self.log(session_id, LogLevel::Info, "OTP dispatched to user")
                    .await;
                Ok(StepOutcome::PauseForInput {
                    next: WorkflowState::AwaitingOtp,
                    prompt: InputPrompt::otp(),
                    retry: false,
                })
            }
            Err(e) if e.is_timeout() => {
                // No confirmation means the CAPTCHA was rejected; re-issue the
                // challenge instead of failing the whole run.
                self.log(
                    session_id,
                    LogLevel::Warn,
                    "OTP dispatch unconfirmed, re-issuing CAPTCHA",
                )
                .await;
                page.click(SEL_CAPTCHA_IMG, ACTION_TIMEOUT).await?;
                tokio::time::sleep(Duration::from_secs(1)).await;
                let captcha = self
                    .capture_element(
                        page,
                        session_id,
                        SEL_CAPTCHA_IMG,
                        "captcha_otp_retry.png",
                        ArtifactKind::CaptchaImage,
                    )
                    .await?;
                Ok(StepOutcome::PauseForInput {
                    next: WorkflowState::AwaitingOtpCaptcha,
                    prompt: InputPrompt::captcha(captcha, "Enter Captcha"),
                    retry: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Submit the OTP and, on acceptance, complete the transaction and
    /// capture the confirmation page.
    async fn submit_otp(
        &self,
        page: &dyn BrowserPage,
        session_id: &str,
        input: &str,
    ) -> Result<StepOutcome, DriverError> {
        self.retrying(session_id, "OTP field", || {
            page.fill(SEL_OTP_FIELD, input, ACTION_TIMEOUT)
        })
        .await?;
        self.retrying(session_id, "submit OTP button", || {
            page.click(SEL_SUBMIT_OTP, ACTION_TIMEOUT)
        })
        .await?;

        match page
            .wait_for_selector(SEL_TRANSACTION, TRANSACTION_TIMEOUT)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_timeout() => {
                self.log(session_id, LogLevel::Error, "OTP rejected by portal")
                    .await;
                let artifact = self.capture_failure(page, session_id).await;
                return Ok(StepOutcome::Failure {
                    reason: "OTP was rejected or the submission did not register".to_string(),
                    artifact,
                });
            }
            Err(e) => return Err(e),
        }

        page.check(SEL_TRANSACTION_ROW, ACTION_TIMEOUT).await?;
        self.retrying(session_id, "final proceed button", || {
            page.click(SEL_PROCEED, ACTION_TIMEOUT)
        })
        .await?;

        let confirmation = self
            .capture_page(
                page,
                session_id,
                "confirmation.png",
                ArtifactKind::FinalConfirmation,
            )
            .await?;
        self.log(session_id, LogLevel::Info, "renewal application submitted")
            .await;

        Ok(StepOutcome::Success {
            artifact: Some(confirmation),
        })
    }

    async fn run_step(
        &self,
        page: &dyn BrowserPage,
        session_id: &str,
        profile: &UserProfile,
        state: &WorkflowState,
        input: Option<&str>,
    ) -> Result<StepOutcome, DriverError> {
        match state {
            WorkflowState::Queued => self.begin(page, session_id, profile).await,
            WorkflowState::AwaitingFormCaptcha => match input {
                Some(answer) => self.submit_form_captcha(page, session_id, answer).await,
                None => Ok(missing_input(state)),
            },
            WorkflowState::AwaitingOtpCaptcha => match input {
                Some(answer) => self.submit_otp_captcha(page, session_id, answer).await,
                None => Ok(missing_input(state)),
            },
            WorkflowState::AwaitingOtp => match input {
                Some(otp) => self.submit_otp(page, session_id, otp).await,
                None => Ok(missing_input(state)),
            },
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Other(_) => {
                Ok(StepOutcome::Failure {
                    reason: format!("no step is defined for state {state}"),
                    artifact: None,
                })
            }
        }
    }
}

fn missing_input(state: &WorkflowState) -> StepOutcome {
    StepOutcome::Failure {
        reason: format!("resumed {state} without the required input"),
        artifact: None,
    }
}

#[async_trait]
impl StepExecutor for RenewalStepExecutor {
    #[instrument(skip(self, page, profile, input), fields(state = %state))]
    async fn execute_step(
        &self,
        page: &dyn BrowserPage,
        session_id: &str,
        profile: &UserProfile,
        state: &WorkflowState,
        input: Option<&str>,
    ) -> StepOutcome {
        match self.run_step(page, session_id, profile, state, input).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.log(
                    session_id,
                    LogLevel::Error,
                    &format!("step in {state} failed: {e}"),
                )
                .await;
                let artifact = self.capture_failure(page, session_id).await;
                let reason = if e.is_timeout() {
                    "a page element was not found in time".to_string()
                } else {
                    format!("browser action failed: {e}")
                };
                StepOutcome::Failure {
                    reason,
                    artifact,
                }
            }
        }
    }
}
