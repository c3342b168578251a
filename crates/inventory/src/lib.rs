//! Inventory domain module.
//!
//! This crate contains business rules for stock and inventory movements,
//! implemented purely as deterministic domain logic (no IO, no storage).

pub mod movement;
pub mod stock;

pub use movement::{
    CompletionValues, InventoryMovement, MovementActor, MovementPatch, MovementStatus,
    MovementType, NewMovement, PendingMovement, determine_movement_type,
};
pub use stock::{StockChange, StockDraft, StockItem, StockPatch};
