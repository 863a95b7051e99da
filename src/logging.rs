//! Development-time tracing for debugging the engine.
//!
//! Tracing is dev diagnostics via `RUST_LOG`, written to stderr; it is not
//! part of the engine's product output. User-facing outcomes flow through
//! `events::EventLog` instead and are unaffected by the filter level.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn` when unset. Compact format on
/// stderr so piped stdout stays clean.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
