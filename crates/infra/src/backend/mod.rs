//! Persistence backend boundary.
//!
//! Entities reach storage as JSON documents partitioned by entity type. A
//! backend hands out [`Session`]s: one pooled connection with one open
//! transaction. Callers finish a session with exactly one `commit` or
//! `rollback`, then `release` it.

pub mod in_memory;
pub mod postgres;
pub mod query;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;

use catalog_core::RecordId;

pub use in_memory::{ConnectionStats, Fault, InMemoryBackend};
pub use postgres::PostgresBackend;
pub use query::{Condition, Filter, Query, Relation, Sort, SortOrder, DELETED_AT};

/// A stored record: a JSON object carrying at least `id`, `created_at`,
/// `updated_at` and `deleted_at`.
pub type Document = Map<String, JsonValue>;

/// Backend operation error.
///
/// These are **infrastructure errors** (connectivity, statement failures).
/// They never reach store callers directly; the store converts them once.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("connection unavailable: {0}")]
    Connection(String),

    #[error("statement failed: {0}")]
    Query(String),

    #[error("session already finished")]
    SessionClosed,

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("injected fault: {0:?}")]
    Injected(Fault),
}

/// Source of sessions (a connection pool).
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Acquire a connection and open a transaction on it.
    ///
    /// May wait for a pooled connection to become available.
    async fn begin(&self) -> Result<Box<dyn Session>, BackendError>;
}

#[async_trait]
impl<B> Backend for Arc<B>
where
    B: Backend + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn begin(&self) -> Result<Box<dyn Session>, BackendError> {
        (**self).begin().await
    }
}

/// One connection with an open transaction.
///
/// Writes are visible to this session immediately and to other sessions
/// only after `commit`.
#[async_trait]
pub trait Session: Send {
    async fn insert(&mut self, entity_type: &str, document: Document) -> Result<(), BackendError>;

    /// Merge `patch` into the top-level fields of the document. Returns
    /// `false` when no document with `id` exists.
    async fn update(
        &mut self,
        entity_type: &str,
        id: RecordId,
        patch: Document,
    ) -> Result<bool, BackendError>;

    async fn find(&mut self, entity_type: &str, query: &Query) -> Result<Vec<Document>, BackendError>;

    async fn count(&mut self, entity_type: &str, filter: &Filter) -> Result<u64, BackendError>;

    async fn commit(&mut self) -> Result<(), BackendError>;

    async fn rollback(&mut self) -> Result<(), BackendError>;

    /// Return the connection to its pool.
    async fn release(self: Box<Self>) -> Result<(), BackendError>;
}
