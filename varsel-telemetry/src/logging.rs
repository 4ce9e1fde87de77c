//! Structured logging setup with tracing.

use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Initializes the global subscriber; `RUST_LOG` overrides the default
    /// `info` filter. Safe to call more than once (later calls are no-ops),
    /// so test binaries can share it.
    pub fn init() {
        let _ = fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_thread_names(true)
            .try_init();
    }
}
