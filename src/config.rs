//! Startup configuration resolved once from the environment.
//!
//! All tunables come from `RENEWBOT_*` environment variables (a `.env` file is
//! honored via dotenvy). The two secrets, the chat-bot credential and the
//! field-encryption key, are required; everything else has a default.

use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

const ENV_BOT_TOKEN: &str = "RENEWBOT_BOT_TOKEN";
const ENV_ENCRYPTION_KEY: &str = "RENEWBOT_ENCRYPTION_KEY";
const ENV_DATABASE_URL: &str = "RENEWBOT_DATABASE_URL";
const ENV_ARTIFACTS_DIR: &str = "RENEWBOT_ARTIFACTS_DIR";
const ENV_POLL_INTERVAL: &str = "RENEWBOT_POLL_INTERVAL_SECS";
const ENV_INPUT_TIMEOUT: &str = "RENEWBOT_INPUT_TIMEOUT_SECS";
const ENV_CAPTCHA_RETRY_LIMIT: &str = "RENEWBOT_CAPTCHA_RETRY_LIMIT";
const ENV_MAX_CONCURRENT: &str = "RENEWBOT_MAX_CONCURRENT_SESSIONS";
const ENV_PORTAL_URL: &str = "RENEWBOT_PORTAL_URL";
const ENV_STATE_CODE: &str = "RENEWBOT_STATE_CODE";
const ENV_RTO_CODE: &str = "RENEWBOT_RTO_CODE";

const DEFAULT_DATABASE_URL: &str = "sqlite://renewbot.db";
const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;
const DEFAULT_INPUT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CAPTCHA_RETRY_LIMIT: u32 = 3;
const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 8;
const DEFAULT_PORTAL_URL: &str =
    "https://sarathi.parivahan.gov.in/sarathiservice/stateSelection.do";
const DEFAULT_STATE_CODE: &str = "MH";
const DEFAULT_RTO_CODE: &str = "MH47";

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("required environment variable {name} is not set")]
    #[diagnostic(
        code(renewbot::config::missing),
        help("Set the variable in the environment or a .env file before starting.")
    )]
    Missing { name: &'static str },

    #[error("environment variable {name} has an invalid value: {value}")]
    #[diagnostic(code(renewbot::config::invalid))]
    Invalid { name: &'static str, value: String },
}

/// Process configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Credential for the outbound chat collaborator.
    pub bot_token: String,
    /// Base64-encoded 32-byte key for field encryption of stored personal data.
    pub encryption_key: String,
    pub database_url: String,
    /// Root directory for per-session screenshot artifacts.
    pub artifacts_dir: PathBuf,
    /// How often the scheduler polls for queued sessions.
    pub poll_interval: Duration,
    /// How long a paused session waits for a human reply before failing.
    pub input_timeout: Duration,
    /// Rejected CAPTCHA answers tolerated per awaiting state; reaching this
    /// count fails the session instead of re-prompting.
    pub captcha_retry_limit: u32,
    /// Cap on simultaneously running orchestrations.
    pub max_concurrent_sessions: usize,
    pub portal_url: String,
    /// Portal state-selection code (e.g. "MH").
    pub state_code: String,
    /// Regional transport office code confirmed during the flow.
    pub rto_code: String,
}

impl Config {
    /// Load configuration from the environment. Absence of a required secret
    /// is a fatal startup error.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            bot_token: require(ENV_BOT_TOKEN)?,
            encryption_key: require(ENV_ENCRYPTION_KEY)?,
            database_url: std::env::var(ENV_DATABASE_URL)
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            artifacts_dir: std::env::var(ENV_ARTIFACTS_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_ARTIFACTS_DIR)),
            poll_interval: Duration::from_secs(parse_or(
                ENV_POLL_INTERVAL,
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
            input_timeout: Duration::from_secs(parse_or(
                ENV_INPUT_TIMEOUT,
                DEFAULT_INPUT_TIMEOUT_SECS,
            )?),
            captcha_retry_limit: parse_or(ENV_CAPTCHA_RETRY_LIMIT, DEFAULT_CAPTCHA_RETRY_LIMIT)?,
            max_concurrent_sessions: parse_or(
                ENV_MAX_CONCURRENT,
                DEFAULT_MAX_CONCURRENT_SESSIONS,
            )?,
            portal_url: std::env::var(ENV_PORTAL_URL)
                .unwrap_or_else(|_| DEFAULT_PORTAL_URL.to_string()),
            state_code: std::env::var(ENV_STATE_CODE)
                .unwrap_or_else(|_| DEFAULT_STATE_CODE.to_string()),
            rto_code: std::env::var(ENV_RTO_CODE)
                .unwrap_or_else(|_| DEFAULT_RTO_CODE.to_string()),
        })
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing { name }),
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(default),
    }
}
