//! Logging setup. The teacher broadcasts every event over an SSE channel for
//! its web UI (`tracing.rs`); this peer has no such consumer, so this is a
//! plain `tracing_subscriber::fmt` layer gated by `RUST_LOG`/`--log-level`.

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `default_level` is the `--log-level` CLI
/// value, used whenever `RUST_LOG` is unset.
pub fn init_tracer(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
