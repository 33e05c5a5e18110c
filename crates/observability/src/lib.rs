//! Process-wide tracing setup shared by the binary and tests.

/// Initialize JSON tracing for the process.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::DEFAULT_DIRECTIVE);
}

/// Human-readable output captured by the test harness.
pub fn init_test() {
    tracing::init_test();
}

pub mod tracing;
