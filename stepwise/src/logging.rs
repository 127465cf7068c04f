//! Development-time tracing.
//!
//! Tracing output is diagnostics only: it goes to stderr, is filtered by
//! `RUST_LOG`, and never carries the user-facing progress messages, which flow
//! through [`crate::executor::ProgressSink`].

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Reads `RUST_LOG`; without it the default is `warn`, or `stepwise=debug`
/// when `verbose` is set. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=stepwise=trace stepwise plan "add a health check endpoint"
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "stepwise=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
