//! Domain primitives shared by every catalog crate: record ids, the
//! `Entity` capability trait and domain errors. No IO.

pub mod entity;
pub mod error;
pub mod id;

pub use entity::{Entity, Timestamps};
pub use error::{DomainError, DomainResult};
pub use id::RecordId;
