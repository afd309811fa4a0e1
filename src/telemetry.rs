//! Opt-in tracing setup for binaries and tests embedding the crate.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a formatted stderr subscriber with env-filter support.
///
/// Respects `RUST_LOG`; defaults to `info` for this crate and `warn` for
/// everything else. Safe to call once per process; embedders that install
/// their own subscriber should skip this.
pub fn init_tracing() {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn,renewbot=info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Test-friendly variant that tolerates repeated initialization.
pub fn try_init_tracing() {
    let fmt_layer = fmt::layer().with_target(false).with_test_writer();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,renewbot=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
