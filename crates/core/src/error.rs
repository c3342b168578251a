//! Errors raised by pure domain rules.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// A business rule refused an input or a state transition.
///
/// Stores and services carry these unchanged; storage failures never appear
/// here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or out-of-range input, e.g. an empty name or a bad ISBN.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The record's current state forbids the change, e.g. resolving a
    /// movement twice or selling stock that is not on hand.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
