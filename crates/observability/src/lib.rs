//! Tracing and logging (shared setup).

/// Initialize process-wide tracing from `config`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(config: &LoggingConfig) {
    tracing::init(config);
}

/// Logging configuration.
pub mod logging;

/// Tracing subscriber setup (filters, output format).
pub mod tracing;

pub use logging::LoggingConfig;
