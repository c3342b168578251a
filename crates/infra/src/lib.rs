//! Infrastructure layer: storage backends, the audited entity store,
//! transactions, movement tracking and the services built on them.

pub mod audit_store;
pub mod backend;
pub mod config;
pub mod error;
pub mod movements;
pub mod services;
pub mod store;
pub mod transaction;

#[cfg(test)]
mod integration_tests;

pub use audit_store::{AuditQuery, StoreAuditSink};
pub use backend::{Backend, BackendError, Filter, InMemoryBackend, PostgresBackend, Session};
pub use config::{BackendKind, ConfigError, StoreConfig};
pub use error::{StoreError, StoreResult, Verb};
pub use movements::MovementTracker;
pub use services::{CatalogService, InventoryService, MovementOutcome};
pub use store::{AuditOptions, EntityStore, Page, PageMeta, Pagination, UniqueConstraint};
pub use transaction::{Transaction, TransactionCoordinator, TransactionOptions};
