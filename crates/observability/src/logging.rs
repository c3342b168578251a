use serde::Deserialize;

/// Log level and output format.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter directive when `RUST_LOG` is unset, e.g. `"info"` or
    /// `"catalog_infra=debug,info"`.
    pub level: String,
    /// JSON lines when `true`, human-readable output otherwise.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}
