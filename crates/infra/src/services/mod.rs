//! Catalog and inventory services: the CRUD layer built on the store,
//! the transaction coordinator and the movement tracker.

pub mod catalog;
pub mod inventory;

pub use catalog::CatalogService;
pub use inventory::{InventoryService, MovementOutcome};
