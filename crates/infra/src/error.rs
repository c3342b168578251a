//! Caller-facing store errors.
//!
//! Backend failures are converted exactly once, where they are first caught,
//! into [`StoreError::Infrastructure`]. The low-level message stays reachable
//! through `source()` for logging but never appears in `Display`.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use catalog_core::{DomainError, RecordId};

use crate::backend::BackendError;

pub type StoreResult<T> = Result<T, StoreError>;

/// The store operation an infrastructure failure interrupted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verb {
    Create,
    Retrieve,
    Update,
    Delete,
    Restore,
    Count,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verb::Create => "create",
            Verb::Retrieve => "retrieve",
            Verb::Update => "update",
            Verb::Delete => "delete",
            Verb::Restore => "restore",
            Verb::Count => "count",
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: RecordId },

    /// Uniqueness violation; carries the constraint's message verbatim.
    #[error("{0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("transaction failed during {operation}")]
    TransactionFailure {
        operation: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    #[error("failed to {verb} entity")]
    Infrastructure {
        verb: Verb,
        #[source]
        source: BackendError,
    },

    /// Arbitrary failure raised by a transaction body.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl StoreError {
    pub fn infrastructure(verb: Verb, source: BackendError) -> Self {
        Self::Infrastructure { verb, source }
    }

    pub fn transaction_failure(
        operation: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::TransactionFailure {
            operation: operation.into(),
            source: Some(source.into()),
        }
    }

    pub fn not_found(entity: &'static str, id: RecordId) -> Self {
        Self::NotFound { entity, id }
    }

    /// Kinds that pass through every layer unchanged.
    ///
    /// Only [`StoreError::Unexpected`] is unrecognized: the coordinator wraps
    /// it into a `TransactionFailure`.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, StoreError::Unexpected(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_display_hides_backend_message() {
        let err = StoreError::infrastructure(
            Verb::Create,
            BackendError::Query("duplicate key value violates users_pkey".to_string()),
        );
        assert_eq!(err.to_string(), "failed to create entity");
        assert!(err.source().unwrap().to_string().contains("users_pkey"));
    }

    #[test]
    fn transaction_failure_names_the_operation() {
        let err = StoreError::transaction_failure("sell", BackendError::SessionClosed);
        assert_eq!(err.to_string(), "transaction failed during sell");
        assert!(err.is_recognized());
    }

    #[test]
    fn only_unexpected_errors_are_unrecognized() {
        assert!(StoreError::Conflict("dup".into()).is_recognized());
        assert!(StoreError::Domain(DomainError::validation("x")).is_recognized());
        assert!(!StoreError::Unexpected(anyhow::anyhow!("boom")).is_recognized());
    }
}
