//! Hand-off point between the chat front-end and paused orchestrator tasks.
//!
//! Exactly one task may wait per session at a time. The chat side calls
//! [`InputRelay::put`] with whatever the user typed; the orchestrator side
//! parks on [`InputRelay::take`] with a deadline. A reply for a session
//! nobody is waiting on is logged and dropped, never an error, because users
//! routinely answer late or twice.

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::warn;

#[derive(Debug, Error, Diagnostic)]
pub enum RelayError {
    #[error("no input arrived within {timeout:?}")]
    #[diagnostic(code(renewbot::relay::timeout))]
    TimedOut { timeout: Duration },

    #[error("another task is already waiting for input on session {session_id}")]
    #[diagnostic(
        code(renewbot::relay::contended),
        help("Each session is driven by exactly one orchestrator task; this indicates a scheduling bug.")
    )]
    AlreadyWaiting { session_id: String },
}

struct Slot {
    /// Generation token so a wait only cleans up the slot it registered,
    /// never one installed by a later `take` on the same session.
    seq: u64,
    tx: oneshot::Sender<String>,
}

/// In-memory mailbox of one pending input slot per paused session.
#[derive(Default)]
pub struct InputRelay {
    slots: Mutex<FxHashMap<String, Slot>>,
    next_seq: AtomicU64,
}

impl InputRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a user reply to whoever is waiting on `session_id`.
    ///
    /// Silently drops the value (with a warning) when nothing is waiting,
    /// which covers late replies, duplicate replies, and replies raced
    /// against a timeout.
    pub fn put(&self, session_id: &str, value: String) {
        let slot = self.slots.lock().remove(session_id);
        match slot {
            Some(Slot { tx, .. }) => {
                if tx.send(value).is_err() {
                    warn!(session_id, "input receiver dropped before delivery");
                }
            }
            None => {
                warn!(session_id, "discarding input: no step is waiting");
            }
        }
    }

    /// Park until a reply arrives for `session_id` or `timeout` elapses.
    ///
    /// The slot is removed on every exit path, so a timed-out wait leaves no
    /// residue and a later [`put`](Self::put) is a clean no-op.
    pub async fn take(&self, session_id: &str, timeout: Duration) -> Result<String, RelayError> {
        let (tx, rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        {
            let mut slots = self.slots.lock();
            if slots.contains_key(session_id) {
                return Err(RelayError::AlreadyWaiting {
                    session_id: session_id.to_string(),
                });
            }
            slots.insert(session_id.to_string(), Slot { seq, tx });
        }

        let result = tokio::time::timeout(timeout, rx).await;
        // On timeout the sender is still parked in the map; on delivery `put`
        // already removed it. Remove only our own registration so a wait that
        // resolved cannot evict a slot installed by a newer `take`.
        {
            let mut slots = self.slots.lock();
            if slots.get(session_id).is_some_and(|slot| slot.seq == seq) {
                slots.remove(session_id);
            }
        }

        match result {
            Ok(Ok(value)) => Ok(value),
            // Sender dropped without sending only happens via discard().
            Ok(Err(_)) => Err(RelayError::TimedOut { timeout }),
            Err(_) => Err(RelayError::TimedOut { timeout }),
        }
    }

    /// Drop any pending slot for `session_id`. Called when a session ends so
    /// a stale waiter cannot capture input meant for a future run.
    pub fn discard(&self, session_id: &str) {
        if self.slots.lock().remove(session_id).is_some() {
            warn!(session_id, "discarded a pending input slot at session end");
        }
    }

    /// Whether a step is currently waiting on this session.
    pub fn is_waiting(&self, session_id: &str) -> bool {
        self.slots.lock().contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn delivers_reply_to_waiter() {
        let relay = Arc::new(InputRelay::new());
        let waiter = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.take("s1", Duration::from_secs(5)).await })
        };
        // Let the waiter register its slot first.
        tokio::task::yield_now().await;
        while !relay.is_waiting("s1") {
            tokio::task::yield_now().await;
        }
        relay.put("s1", "XK4P9".to_string());
        assert_eq!(waiter.await.unwrap().unwrap(), "XK4P9");
        assert!(!relay.is_waiting("s1"));
    }

    #[tokio::test]
    async fn take_times_out_and_clears_slot() {
        let relay = InputRelay::new();
        let err = relay.take("s1", Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, RelayError::TimedOut { .. }));
        assert!(!relay.is_waiting("s1"));
        // A late reply after timeout is dropped without panic.
        relay.put("s1", "late".to_string());
    }

    #[tokio::test]
    async fn put_without_waiter_is_dropped() {
        let relay = InputRelay::new();
        relay.put("ghost", "anything".to_string());
        assert!(!relay.is_waiting("ghost"));
    }

    #[tokio::test]
    async fn resolved_wait_does_not_evict_a_newer_slot() {
        let relay = Arc::new(InputRelay::new());
        let first = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.take("s1", Duration::from_secs(5)).await })
        };
        while !relay.is_waiting("s1") {
            tokio::task::yield_now().await;
        }
        relay.put("s1", "first".to_string());

        // Register a second wait before the first one has run its cleanup.
        let mut second = Box::pin(relay.take("s1", Duration::from_secs(5)));
        let waker = std::task::Waker::noop();
        let mut cx = std::task::Context::from_waker(waker);
        assert!(second.as_mut().poll(&mut cx).is_pending());
        assert!(relay.is_waiting("s1"));

        // The first wait resumes and cleans up; the new slot must survive.
        assert_eq!(first.await.unwrap().unwrap(), "first");
        assert!(relay.is_waiting("s1"));

        relay.put("s1", "second".to_string());
        assert_eq!(second.await.unwrap(), "second");
    }

    #[tokio::test]
    async fn second_waiter_is_rejected() {
        let relay = Arc::new(InputRelay::new());
        let first = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.take("s1", Duration::from_secs(5)).await })
        };
        while !relay.is_waiting("s1") {
            tokio::task::yield_now().await;
        }
        let err = relay.take("s1", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, RelayError::AlreadyWaiting { .. }));
        relay.put("s1", "ok".to_string());
        assert_eq!(first.await.unwrap().unwrap(), "ok");
    }
}
