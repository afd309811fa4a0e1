mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use common::*;
use renewbot::chat::Notifier;
use renewbot::relay::InputRelay;
use renewbot::scheduler::SessionScheduler;
use renewbot::store::models::SessionResult;
use renewbot::workflow::{InputPrompt, StepExecutor, StepOutcome, WorkflowState};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

fn captcha_pause() -> StepOutcome {
    StepOutcome::PauseForInput {
        next: WorkflowState::AwaitingFormCaptcha,
        prompt: InputPrompt::captcha(PathBuf::from("captcha.png"), "Enter Captcha Here"),
        retry: false,
    }
}

struct SchedulerHarness {
    db: TestDb,
    relay: Arc<InputRelay>,
    scheduler: Arc<SessionScheduler>,
}

async fn scheduler_harness(
    executor: Arc<dyn StepExecutor>,
    input_timeout: Duration,
    max_concurrent: usize,
) -> SchedulerHarness {
    let db = test_db().await;
    let relay = Arc::new(InputRelay::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let orchestrator = Arc::new(build_orchestrator(
        db.store.clone(),
        relay.clone(),
        notifier as Arc<dyn Notifier>,
        executor,
        Arc::new(NullDriver::new()),
        input_timeout,
        3,
    ));
    let scheduler = Arc::new(SessionScheduler::new(
        db.store.clone(),
        orchestrator,
        Duration::from_millis(20),
        max_concurrent,
    ));
    SchedulerHarness {
        db,
        relay,
        scheduler,
    }
}

#[tokio::test]
async fn double_discovery_spawns_exactly_one_task() {
    let executor = Arc::new(ScriptedExecutor::new(vec![captcha_pause()]));
    let h = scheduler_harness(executor.clone(), Duration::from_millis(50), 8).await;
    let user_id = seed_user(&h.db.store).await;
    h.db.store.create_session(user_id).await.expect("session");

    let mut tasks = JoinSet::new();
    // Two consecutive polls observe the same queued session.
    h.scheduler.poll_once(&mut tasks).await.expect("poll 1");
    h.scheduler.poll_once(&mut tasks).await.expect("poll 2");
    assert_eq!(tasks.len(), 1);

    while tasks.join_next().await.is_some() {}

    // Exactly one orchestration touched the session.
    let queued_calls = executor
        .calls()
        .iter()
        .filter(|(state, _)| state == "QUEUED")
        .count();
    assert_eq!(queued_calls, 1);
    assert!(h.scheduler.active().is_empty(), "claim released at task end");
}

#[tokio::test]
async fn concurrency_cap_leaves_overflow_queued() {
    let executor = Arc::new(ScriptedExecutor::new(vec![captcha_pause(), captcha_pause()]));
    let h = scheduler_harness(executor, Duration::from_millis(50), 1).await;

    seed_user(&h.db.store).await;
    h.db.store
        .upsert_user(202, "MH0220110000001", NaiveDate::from_ymd_opt(1992, 3, 4).unwrap())
        .await
        .expect("second user");
    h.db.store.create_session(TEST_USER).await.expect("a");
    h.db.store.create_session(202).await.expect("b");

    let mut tasks = JoinSet::new();
    h.scheduler.poll_once(&mut tasks).await.expect("poll");

    // Only one task fits under the cap; the other session stays queued and
    // unclaimed for a later tick.
    assert_eq!(tasks.len(), 1);
    assert_eq!(h.scheduler.active().len(), 1);

    while tasks.join_next().await.is_some() {}

    // With the permit back, the next poll picks up the leftover session.
    let mut tasks = JoinSet::new();
    h.scheduler.poll_once(&mut tasks).await.expect("poll");
    assert_eq!(tasks.len(), 1);
    while tasks.join_next().await.is_some() {}
}

#[tokio::test]
async fn shutdown_drains_running_sessions() {
    let executor = Arc::new(ScriptedExecutor::new(vec![
        captcha_pause(),
        StepOutcome::Success { artifact: None },
    ]));
    let h = scheduler_harness(executor, Duration::from_secs(5), 8).await;
    let user_id = seed_user(&h.db.store).await;
    let session = h.db.store.create_session(user_id).await.expect("session");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let loop_task = {
        let scheduler = h.scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    // Wait for the session's task to park on the relay.
    for _ in 0..500 {
        if h.relay.is_waiting(&session.id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.relay.is_waiting(&session.id));

    // Stop the scheduler while the session is mid-flight, then let it finish.
    shutdown_tx.send(()).expect("signal shutdown");
    h.relay.put(&session.id, "XK4P9".to_string());

    tokio::time::timeout(Duration::from_secs(10), loop_task)
        .await
        .expect("drain completes")
        .expect("loop task");

    let done = h.db.store.session(&session.id).await.expect("session");
    assert_eq!(done.result, Some(SessionResult::Success));
    assert!(h.scheduler.active().is_empty());
}

#[tokio::test]
async fn poll_loop_picks_up_later_arrivals() {
    let executor = Arc::new(ScriptedExecutor::new(vec![StepOutcome::Success {
        artifact: None,
    }]));
    let h = scheduler_harness(executor, Duration::from_millis(50), 8).await;
    let user_id = seed_user(&h.db.store).await;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let loop_task = {
        let scheduler = h.scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    // Queue the session after the loop is already running.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let session = h.db.store.create_session(user_id).await.expect("session");

    let mut closed = false;
    for _ in 0..500 {
        let row = h.db.store.session(&session.id).await.expect("session");
        if row.result.is_some() {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(closed, "scheduler never ran the queued session");

    shutdown_tx.send(()).expect("signal shutdown");
    tokio::time::timeout(Duration::from_secs(10), loop_task)
        .await
        .expect("loop exits")
        .expect("loop task");
}
