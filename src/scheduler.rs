//! Queue polling and session task lifecycle.
//!
//! The scheduler owns the poll loop: every tick it reads queued sessions,
//! claims each one in the in-process [`ActiveSet`] before spawning its task,
//! and caps parallel runs with a semaphore. Claiming before spawning means a
//! session observed by two consecutive polls still gets exactly one task.
//!
//! Shutdown is cooperative: the loop stops claiming new work and drains the
//! tasks already running to their terminal states.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use crate::orchestrator::Orchestrator;
use crate::store::{SessionStore, StoreError};

/// In-process registry of sessions that currently have a driving task.
#[derive(Default)]
pub struct ActiveSet {
    inner: Mutex<FxHashSet<String>>,
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a session for execution. Returns false if it is already claimed.
    pub fn try_claim(&self, session_id: &str) -> bool {
        self.inner.lock().insert(session_id.to_string())
    }

    pub fn release(&self, session_id: &str) {
        self.inner.lock().remove(session_id);
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.inner.lock().contains(session_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Releases a claim when the session task ends, however it ends.
struct ClaimGuard {
    active: Arc<ActiveSet>,
    session_id: String,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.active.release(&self.session_id);
    }
}

/// Polls the queue and runs one orchestrator task per claimed session.
pub struct SessionScheduler {
    store: Arc<SessionStore>,
    orchestrator: Arc<Orchestrator>,
    active: Arc<ActiveSet>,
    poll_interval: Duration,
    permits: Arc<Semaphore>,
}

impl SessionScheduler {
    pub fn new(
        store: Arc<SessionStore>,
        orchestrator: Arc<Orchestrator>,
        poll_interval: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            orchestrator,
            active: Arc::new(ActiveSet::new()),
            poll_interval,
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Sessions currently claimed by a running task.
    pub fn active(&self) -> &Arc<ActiveSet> {
        &self.active
    }

    /// Run the poll loop until `shutdown` fires, then drain running sessions.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, draining running sessions");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once(&mut tasks).await {
                        warn!(error = %e, "queue poll failed, will retry next tick");
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "session task aborted abnormally");
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "session task aborted abnormally during drain");
            }
        }
        info!("all session tasks drained");
    }

    /// One poll pass: claim and spawn every queued session capacity allows.
    pub async fn poll_once(&self, tasks: &mut JoinSet<()>) -> Result<(), StoreError> {
        for session in self.store.queued_sessions().await? {
            // Claim first; a session seen by two polls gets exactly one task.
            if !self.active.try_claim(&session.id) {
                continue;
            }
            let guard = ClaimGuard {
                active: self.active.clone(),
                session_id: session.id.clone(),
            };

            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    // At capacity. The guard drop releases the claim and the
                    // session stays queued for a later tick.
                    drop(guard);
                    info!(session_id = %session.id, "concurrency limit reached, leaving queued");
                    break;
                }
            };

            let orchestrator = self.orchestrator.clone();
            let session_id = session.id.clone();
            info!(session_id = %session_id, "claimed queued session");
            tasks.spawn(async move {
                let _permit = permit;
                let _guard = guard;
                orchestrator.run(&session_id).await;
            });
        }
        Ok(())
    }
}
