//! Logging initialization
//!
//! Library-friendly tracing setup: honors `RUST_LOG` when set, defaults
//! to info-level output for the crate otherwise. Safe to call more than
//! once; later calls are no-ops.

use tracing_subscriber::EnvFilter;

/// Initialize tracing output to stderr
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("themis_core=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
