use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::NaiveDate;
use tempfile::TempDir;

use renewbot::browser::BrowserDriver;
use renewbot::chat::Notifier;
use renewbot::crypto::FieldCipher;
use renewbot::orchestrator::Orchestrator;
use renewbot::relay::InputRelay;
use renewbot::store::SessionStore;
use renewbot::workflow::StepExecutor;

pub const TEST_USER: i64 = 101;
pub const TEST_LICENSE: &str = "MH4720110012345";

pub fn test_cipher() -> FieldCipher {
    FieldCipher::from_base64_key(&BASE64.encode([9u8; 32])).expect("test key")
}

/// A store backed by a database file in a temp dir; keep the guard alive for
/// the duration of the test so pooled connections share one database.
pub struct TestDb {
    pub store: Arc<SessionStore>,
    pub dir: TempDir,
}

pub async fn test_db() -> TestDb {
    renewbot::telemetry::try_init_tracing();
    let dir = TempDir::new().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let store = SessionStore::connect(&url, test_cipher())
        .await
        .expect("connect test db");
    TestDb {
        store: Arc::new(store),
        dir,
    }
}

pub async fn seed_user(store: &SessionStore) -> i64 {
    store
        .upsert_user(
            TEST_USER,
            TEST_LICENSE,
            NaiveDate::from_ymd_opt(1990, 1, 15).expect("valid date"),
        )
        .await
        .expect("seed user");
    TEST_USER
}

#[allow(clippy::too_many_arguments)]
pub fn build_orchestrator(
    store: Arc<SessionStore>,
    relay: Arc<InputRelay>,
    notifier: Arc<dyn Notifier>,
    executor: Arc<dyn StepExecutor>,
    driver: Arc<dyn BrowserDriver>,
    input_timeout: Duration,
    captcha_retry_limit: u32,
) -> Orchestrator {
    Orchestrator::new(
        store,
        relay,
        notifier,
        executor,
        driver,
        input_timeout,
        captcha_retry_limit,
    )
}
