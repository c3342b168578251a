//! Store configuration: defaults overlaid with `CATALOG_*` environment
//! variables.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use catalog_audit::AuditEnvironment;
use catalog_observability::LoggingConfig;

use crate::backend::{Backend, BackendError, InMemoryBackend, PostgresBackend};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("{0} is required for the postgres backend")]
    Missing(&'static str),

    #[error("failed to connect backend")]
    Connect(#[source] BackendError),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Stamped on every audit record.
    pub environment: String,
    pub backend: BackendKind,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub logging: LoggingConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            backend: BackendKind::Memory,
            database_url: None,
            max_connections: 10,
            acquire_timeout_secs: 30,
            logging: LoggingConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Layer variables from `lookup` over the defaults. Empty values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = var("CATALOG_ENVIRONMENT") {
            config.environment = v;
        }
        if let Some(v) = var("CATALOG_BACKEND") {
            config.backend = match v.to_lowercase().as_str() {
                "memory" => BackendKind::Memory,
                "postgres" => BackendKind::Postgres,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "CATALOG_BACKEND".to_string(),
                        message: format!("unknown backend '{other}'"),
                    });
                }
            };
        }
        if let Some(v) = var("CATALOG_DATABASE_URL") {
            config.database_url = Some(v);
        }
        if let Some(v) = parse::<u32>("CATALOG_MAX_CONNECTIONS", var("CATALOG_MAX_CONNECTIONS"))? {
            config.max_connections = v;
        }
        if let Some(v) = parse::<u64>("CATALOG_ACQUIRE_TIMEOUT_SECS", var("CATALOG_ACQUIRE_TIMEOUT_SECS"))? {
            config.acquire_timeout_secs = v;
        }
        if let Some(v) = var("CATALOG_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = var("CATALOG_LOG_JSON") {
            config.logging.json = v.eq_ignore_ascii_case("true") || v == "1";
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_connections".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.backend == BackendKind::Postgres && self.database_url.is_none() {
            return Err(ConfigError::Missing("CATALOG_DATABASE_URL"));
        }
        Ok(())
    }

    pub fn audit_environment(&self) -> AuditEnvironment {
        AuditEnvironment::current(self.environment.clone())
    }

    /// Build the configured backend. Postgres schemas are created if missing.
    pub async fn connect(&self) -> Result<Arc<dyn Backend>, ConfigError> {
        self.validate()?;
        match self.backend {
            BackendKind::Memory => {
                debug!("using in-memory backend");
                Ok(Arc::new(InMemoryBackend::new()))
            }
            BackendKind::Postgres => {
                let url = self
                    .database_url
                    .as_deref()
                    .ok_or(ConfigError::Missing("CATALOG_DATABASE_URL"))?;
                let backend = PostgresBackend::connect(
                    url,
                    self.max_connections,
                    Duration::from_secs(self.acquire_timeout_secs),
                )
                .await
                .map_err(ConfigError::Connect)?;
                backend.ensure_schema().await.map_err(ConfigError::Connect)?;
                info!(max_connections = self.max_connections, "connected to postgres");
                Ok(Arc::new(backend))
            }
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    match raw {
        Some(v) => v.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("invalid number '{v}'"),
        }),
        None => Ok(None),
    }
}
