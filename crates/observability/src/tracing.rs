//! Subscriber construction.
//!
//! `RUST_LOG` wins over the default directive when it parses.

use tracing_subscriber::EnvFilter;

/// Workflow crates at `info`, everything else at `warn`.
pub const DEFAULT_DIRECTIVE: &str = "warn,orderflow_infra=info,orderflow_api=info";

pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

pub fn init(default_directive: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .json()
        .with_current_span(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter("debug"))
        .with_test_writer()
        .try_init();
}
