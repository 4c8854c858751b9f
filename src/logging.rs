//! Logging init for the binary. The library only emits `tracing` events.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,fetchd=debug";

/// Structured logging to stderr, filtered by `RUST_LOG` when set.
pub fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
