//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

use crate::logging::LoggingConfig;

/// Initialize tracing/logging for the process.
///
/// `RUST_LOG` wins over `config.level`. Safe to call multiple times
/// (subsequent calls are no-ops).
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    // JSON logs + timestamps by default; pretty output for local runs.
    let _ = if config.json {
        builder.json().with_target(false).try_init()
    } else {
        builder.pretty().try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_is_harmless() {
        let config = LoggingConfig {
            level: "not a directive ===".to_string(),
            json: false,
        };
        init(&config);
        init(&LoggingConfig::default());
    }
}
