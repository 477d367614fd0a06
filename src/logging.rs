//! Logging initialization for the `relink` binary.
//!
//! Configures the `tracing` subscriber with level filtering via the
//! `RELINK_LOG` environment variable. Falls back to `info` level when the
//! variable is unset.
//!
//! ```bash
//! RELINK_LOG=debug relink connect --addr 127.0.0.1:3563
//! RELINK_LOG=relink::client=trace,warn relink connect --addr 127.0.0.1:3563
//! ```
//!
//! The library itself only emits events; embedding applications install
//! whatever subscriber they like.

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "RELINK_LOG";

/// Builds the filter from `RELINK_LOG`, falling back to `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber, writing to stderr.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init() {
    fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
