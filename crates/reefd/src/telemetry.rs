//! Telemetry initialization for the Reef daemon.
//!
//! Human-readable logs to stdout, filtered by `RUST_LOG` when set and by
//! the configured `[log] level` otherwise.

use tracing_subscriber::EnvFilter;

/// Initialize the `tracing` subscriber.
///
/// Call this once at startup, before any `tracing` events are emitted.
pub fn init(level: &str) {
    tracing_subscriber::fmt().with_env_filter(filter(level)).init();
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
