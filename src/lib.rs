//! # Renewbot: human-in-the-loop session orchestration
//!
//! Renewbot drives a government driver's-license-renewal web form to
//! completion on behalf of chat users, pausing for human-provided CAPTCHA
//! solutions and one-time passcodes. Sessions are durable: their state lives
//! in SQLite, so runs survive process restarts and many can proceed at once
//! without interfering with each other.
//!
//! ## Core Concepts
//!
//! - **Session**: one end-to-end automation run for one user, tracked through
//!   a sequence of workflow states to a terminal outcome
//! - **Step Executor**: performs exactly one unit of external-world work per
//!   invocation and reports continue / pause / success / failure
//! - **Input Relay**: single-slot rendezvous connecting an asynchronously
//!   arriving human reply to the orchestration task awaiting it
//! - **Orchestrator**: the per-session state-machine loop
//! - **Scheduler**: discovers queued sessions and runs one orchestration per
//!   session, at most once
//!
//! ## Module Guide
//!
//! - [`config`] - Startup configuration from the environment
//! - [`store`] - Durable users, sessions, log events, and artifacts
//! - [`workflow`] - State vocabulary, step outcomes, and the step executor
//! - [`browser`] - Collaborator traits for the per-session browser page
//! - [`relay`] - The keyed single-slot input rendezvous
//! - [`chat`] - Outbound notification trait and inbound reply routing
//! - [`orchestrator`] - The per-session state-machine driver
//! - [`scheduler`] - The steady-state poll-and-spawn loop
//! - [`crypto`] - Field encryption for stored personal data
//! - [`telemetry`] - Opt-in tracing subscriber setup

pub mod browser;
pub mod chat;
pub mod config;
pub mod crypto;
pub mod orchestrator;
pub mod relay;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod workflow;
