//! Audit trail: immutable records describing who did what to which entity.
//!
//! Records are written through an [`AuditSink`]; callers go through
//! [`AuditWriter`], which never lets a sink failure reach the business
//! operation that triggered it.

pub mod error;
pub mod record;
pub mod sink;
pub mod writer;

pub use error::{AuditError, AuditResult};
pub use record::{
    AuditAction, AuditEntry, AuditOutcome, AuditRecord, Immutable, NewAuditRecord,
};
pub use sink::{AuditSink, FanoutSink, MemoryAuditSink, TracingAuditSink};
pub use writer::{AuditDelivery, AuditEnvironment, AuditWriter};
