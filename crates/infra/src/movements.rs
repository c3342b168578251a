//! Inventory movement tracking inside caller transactions.
//!
//! A movement is written PENDING in the caller's transaction and resolved at
//! most once, to COMPLETED or ERROR, in that same transaction. Resolving an
//! already resolved movement is rejected and leaves the row unchanged.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, instrument};

use catalog_core::RecordId;
use catalog_inventory::{
    determine_movement_type, CompletionValues, InventoryMovement, MovementType, NewMovement,
    PendingMovement,
};

use crate::backend::{Backend, Filter};
use crate::error::{StoreError, StoreResult};
use crate::store::{EntityStore, Page, Pagination};
use crate::transaction::Transaction;

/// Movement rows are bookkeeping, not user actions: the tracker's store is
/// never audited.
#[derive(Debug, Clone)]
pub struct MovementTracker {
    store: EntityStore<InventoryMovement>,
}

impl MovementTracker {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            store: EntityStore::without_audit(backend),
        }
    }

    #[instrument(skip_all, fields(entity_type = %movement.entity_type, entity_id = %movement.entity_id), err)]
    pub async fn create_pending_movement(
        &self,
        movement: NewMovement,
        tx: &Transaction,
    ) -> StoreResult<RecordId> {
        let pending = PendingMovement::from(movement);
        let created = self.store.in_transaction(tx).create(&pending, None).await?;
        debug!(movement_id = %created.id, "pending movement recorded");
        Ok(created.id)
    }

    /// Resolve as COMPLETED. A resolved `quantity_after` of zero forces
    /// `OutOfStock` whatever type `values` carries.
    #[instrument(skip_all, fields(movement_id = %movement_id), err)]
    pub async fn mark_completed(
        &self,
        movement_id: RecordId,
        tx: &Transaction,
        values: Option<CompletionValues>,
    ) -> StoreResult<InventoryMovement> {
        let store = self.store.in_transaction(tx);
        let movement = Self::load(&store, movement_id).await?;
        let patch = movement.complete(&values.unwrap_or_default())?;
        let resolved = store.update(movement_id, &patch, None).await?;
        debug!(movement_type = ?resolved.movement_type, "movement completed");
        Ok(resolved)
    }

    /// Resolve as ERROR, keeping `message` in `notes`.
    #[instrument(skip_all, fields(movement_id = %movement_id), err)]
    pub async fn mark_error(
        &self,
        movement_id: RecordId,
        tx: &Transaction,
        message: &str,
    ) -> StoreResult<InventoryMovement> {
        let store = self.store.in_transaction(tx);
        let movement = Self::load(&store, movement_id).await?;
        let patch = movement.fail(message)?;
        let resolved = store.update(movement_id, &patch, None).await?;
        debug!("movement marked as error");
        Ok(resolved)
    }

    pub fn determine_movement_type(
        is_create: bool,
        is_delete: bool,
        price_before: Option<Decimal>,
        price_after: Option<Decimal>,
        quantity_before: Option<i64>,
        quantity_after: Option<i64>,
    ) -> MovementType {
        determine_movement_type(
            is_create,
            is_delete,
            price_before,
            price_after,
            quantity_before,
            quantity_after,
        )
    }

    /// Movements recorded for one entity, newest first by default.
    pub async fn history(
        &self,
        entity_id: RecordId,
        pagination: &Pagination,
    ) -> StoreResult<Page<InventoryMovement>> {
        let filter = Filter::new().eq("entity_id", entity_id.to_string());
        self.store.find_many_paged(filter, pagination).await
    }

    pub async fn find(&self, movement_id: RecordId) -> StoreResult<Option<InventoryMovement>> {
        self.store.find_by_id(movement_id).await
    }

    async fn load(
        store: &EntityStore<InventoryMovement>,
        movement_id: RecordId,
    ) -> StoreResult<InventoryMovement> {
        store
            .find_by_id(movement_id)
            .await?
            .ok_or_else(|| StoreError::not_found("InventoryMovement", movement_id))
    }
}
