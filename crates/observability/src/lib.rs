//! Tracing and logging setup shared by shipyard binaries and tests.

/// Tracing configuration (filters, formatters).
pub mod tracing;

pub use crate::tracing::ObservabilityConfig;

/// Initialize process-wide tracing with JSON output and `RUST_LOG` filtering
/// (default `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init_with(&ObservabilityConfig::default());
}

/// Initialize process-wide tracing with `config`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_with(config: &ObservabilityConfig) -> bool {
    tracing::init_with(config)
}
