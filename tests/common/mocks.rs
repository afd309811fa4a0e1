use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use renewbot::browser::{BrowserDriver, BrowserPage, DriverError};
use renewbot::chat::{Notifier, NotifyError};
use renewbot::store::models::UserProfile;
use renewbot::workflow::{StepExecutor, StepOutcome, WorkflowState};

/// Scriptable page double. Actions are recorded; selectors time out when told
/// to, so executor retry and rejection paths can be driven deterministically.
#[derive(Default)]
pub struct MockPage {
    pub actions: Mutex<Vec<String>>,
    present: Mutex<FxHashSet<String>>,
    timeouts: Mutex<FxHashMap<String, u32>>,
}

impl MockPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `wait_for_selector(selector)` succeed.
    pub fn mark_present(&self, selector: &str) {
        self.present.lock().insert(selector.to_string());
    }

    /// Make the next `n` actions touching `selector` time out.
    pub fn time_out_times(&self, selector: &str, n: u32) {
        self.timeouts.lock().insert(selector.to_string(), n);
    }

    pub fn recorded(&self) -> Vec<String> {
        self.actions.lock().clone()
    }

    fn consume_timeout(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        let mut timeouts = self.timeouts.lock();
        if let Some(remaining) = timeouts.get_mut(selector) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DriverError::Timeout {
                    what: selector.to_string(),
                    timeout,
                });
            }
        }
        Ok(())
    }

    fn record(&self, entry: String) {
        self.actions.lock().push(entry);
    }
}

#[async_trait]
impl BrowserPage for MockPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), DriverError> {
        self.consume_timeout(url, timeout)?;
        self.record(format!("goto {url}"));
        Ok(())
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        self.consume_timeout(selector, timeout)?;
        self.record(format!("click {selector}"));
        Ok(())
    }

    async fn fill(
        &self,
        selector: &str,
        value: &str,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        self.consume_timeout(selector, timeout)?;
        self.record(format!("fill {selector}={value}"));
        Ok(())
    }

    async fn select_option(
        &self,
        selector: &str,
        value: &str,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        self.consume_timeout(selector, timeout)?;
        self.record(format!("select {selector}={value}"));
        Ok(())
    }

    async fn check(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        self.consume_timeout(selector, timeout)?;
        self.record(format!("check {selector}"));
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        self.record(format!("wait {selector}"));
        if self.present.lock().contains(selector) {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                what: selector.to_string(),
                timeout,
            })
        }
    }

    async fn screenshot_element(
        &self,
        selector: &str,
        path: &Path,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        self.consume_timeout(selector, timeout)?;
        std::fs::write(path, b"PNG").map_err(|e| DriverError::Action {
            what: selector.to_string(),
            message: e.to_string(),
        })?;
        self.record(format!("shot {selector} -> {}", path.display()));
        Ok(())
    }

    async fn screenshot_page(&self, path: &Path) -> Result<(), DriverError> {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        std::fs::write(path, b"PNG").map_err(|e| DriverError::Action {
            what: "page".to_string(),
            message: e.to_string(),
        })?;
        self.record(format!("shot page -> {}", path.display()));
        Ok(())
    }

    async fn close(&self) {
        self.record("close".to_string());
    }
}

/// Page whose every action succeeds and does nothing. For orchestrator tests
/// that drive a scripted executor.
pub struct NullPage;

#[async_trait]
impl BrowserPage for NullPage {
    async fn goto(&self, _url: &str, _timeout: Duration) -> Result<(), DriverError> {
        Ok(())
    }
    async fn click(&self, _selector: &str, _timeout: Duration) -> Result<(), DriverError> {
        Ok(())
    }
    async fn fill(
        &self,
        _selector: &str,
        _value: &str,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        Ok(())
    }
    async fn select_option(
        &self,
        _selector: &str,
        _value: &str,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        Ok(())
    }
    async fn check(&self, _selector: &str, _timeout: Duration) -> Result<(), DriverError> {
        Ok(())
    }
    async fn wait_for_selector(
        &self,
        _selector: &str,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        Ok(())
    }
    async fn screenshot_element(
        &self,
        _selector: &str,
        _path: &Path,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        Ok(())
    }
    async fn screenshot_page(&self, _path: &Path) -> Result<(), DriverError> {
        Ok(())
    }
    async fn close(&self) {}
}

/// Driver that hands out [`NullPage`]s, or refuses when told to fail.
#[derive(Default)]
pub struct NullDriver {
    pub fail: bool,
}

impl NullDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl BrowserDriver for NullDriver {
    async fn new_page(&self, session_id: &str) -> Result<Box<dyn BrowserPage>, DriverError> {
        if self.fail {
            return Err(DriverError::Closed {
                message: format!("no browser available for {session_id}"),
            });
        }
        Ok(Box::new(NullPage))
    }
}

/// Executor double that replays a prearranged sequence of outcomes and
/// records what it was invoked with.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<StepOutcome>>,
    pub calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedExecutor {
    pub fn new(outcomes: Vec<StepOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute_step(
        &self,
        _page: &dyn BrowserPage,
        _session_id: &str,
        _profile: &UserProfile,
        state: &WorkflowState,
        input: Option<&str>,
    ) -> StepOutcome {
        self.calls
            .lock()
            .push((state.encode(), input.map(str::to_string)));
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| StepOutcome::Failure {
                reason: "scripted executor ran out of outcomes".to_string(),
                artifact: None,
            })
    }
}

/// What the notifier double was asked to deliver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    Text {
        user_id: i64,
        text: String,
    },
    Image {
        user_id: i64,
        path: PathBuf,
        caption: String,
    },
}

impl Sent {
    pub fn body(&self) -> &str {
        match self {
            Sent::Text { text, .. } => text,
            Sent::Image { caption, .. } => caption,
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_text(&self, user_id: i64, text: &str) -> Result<(), NotifyError> {
        self.sent.lock().push(Sent::Text {
            user_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_image(
        &self,
        user_id: i64,
        path: &Path,
        caption: &str,
    ) -> Result<(), NotifyError> {
        self.sent.lock().push(Sent::Image {
            user_id,
            path: path.to_path_buf(),
            caption: caption.to_string(),
        });
        Ok(())
    }
}
