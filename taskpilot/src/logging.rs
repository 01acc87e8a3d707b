//! Diagnostic tracing for the taskpilot CLI.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. It is not a record
//! of work: task collections, checkpoints and agent logs under `.taskpilot/`
//! are written regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn` if unset. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=taskpilot=debug taskpilot autopilot --dry-run
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
