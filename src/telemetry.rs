//! Logging setup for kindling
//!
//! Plain tracing-based logging. This is a test harness, so there is no
//! exporter wiring, just stderr output filtered through `RUST_LOG`.
//!
//! # Example
//!
//! ```no_run
//! use kindling::telemetry::init_logging;
//!
//! init_logging();
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize logging with tracing-subscriber
///
/// Uses the RUST_LOG env var for filtering (default: info). Safe to call
/// more than once; later calls are ignored.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
