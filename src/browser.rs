//! Collaborator traits for the browser automation driver.
//!
//! The orchestration core never touches a real browser; it drives one
//! isolated page per session through this boundary. Every primitive takes an
//! explicit timeout and a deadline miss is a distinguishable
//! [`DriverError::Timeout`], which is what the step executor's bounded-retry
//! logic keys on.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DriverError {
    /// The element or condition did not materialize within the deadline.
    /// This is the primary source of transient noise and is retryable.
    #[error("timed out after {timeout:?} waiting for {what}")]
    #[diagnostic(code(renewbot::browser::timeout))]
    Timeout { what: String, timeout: Duration },

    /// The action was attempted and rejected by the page.
    #[error("browser action failed on {what}: {message}")]
    #[diagnostic(code(renewbot::browser::action))]
    Action { what: String, message: String },

    /// The page or browser context is gone.
    #[error("browser context closed: {message}")]
    #[diagnostic(code(renewbot::browser::closed))]
    Closed { message: String },
}

impl DriverError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }
}

/// One isolated browser page, exclusively owned by a single session's
/// orchestrator task for the duration of its run.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), DriverError>;

    async fn fill(&self, selector: &str, value: &str, timeout: Duration)
    -> Result<(), DriverError>;

    async fn select_option(
        &self,
        selector: &str,
        value: &str,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// Tick a checkbox.
    async fn check(&self, selector: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Wait until the selector is visible. Timing out is the normal way to
    /// learn that an expected (or feared) element is absent.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
    -> Result<(), DriverError>;

    /// Screenshot a single element to `path`.
    async fn screenshot_element(
        &self,
        selector: &str,
        path: &Path,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// Screenshot the full page to `path`.
    async fn screenshot_page(&self, path: &Path) -> Result<(), DriverError>;

    /// Release the page and its context. Idempotent.
    async fn close(&self);
}

/// Produces one isolated [`BrowserPage`] per session. Pages are never shared
/// across sessions.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn new_page(&self, session_id: &str) -> Result<Box<dyn BrowserPage>, DriverError>;
}
