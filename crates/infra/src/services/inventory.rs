//! Stock levels and prices, with every change tracked as a movement.
//!
//! Each operation runs in one transaction: a PENDING movement is written,
//! the stock change is applied, and the movement is resolved. A change the
//! domain refuses (selling more than on hand, a no-op reprice) resolves the
//! movement as ERROR and commits that record; any other failure rolls the
//! whole unit back.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use catalog_audit::{AuditAction, AuditWriter};
use catalog_catalog::Book;
use catalog_core::{DomainResult, Entity, RecordId};
use catalog_inventory::{
    CompletionValues, InventoryMovement, MovementActor, MovementType, NewMovement, StockChange,
    StockDraft, StockItem,
};

use crate::backend::{Backend, Filter};
use crate::error::{StoreError, StoreResult};
use crate::movements::MovementTracker;
use crate::store::{AuditOptions, EntityStore, Page, Pagination, UniqueConstraint};
use crate::transaction::{Transaction, TransactionCoordinator, TransactionOptions};

pub const STOCK_EXISTS: &str = "Stock is already tracked for this book";

/// How a tracked stock operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovementOutcome {
    Completed {
        movement: InventoryMovement,
        stock: StockItem,
    },
    /// The domain refused the change; the movement was stored as ERROR.
    Rejected {
        movement: InventoryMovement,
        reason: String,
    },
}

impl MovementOutcome {
    pub fn movement(&self) -> &InventoryMovement {
        match self {
            MovementOutcome::Completed { movement, .. } | MovementOutcome::Rejected { movement, .. } => movement,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, MovementOutcome::Completed { .. })
    }
}

/// A requested stock change, checked against the item's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StockRequest {
    Receive(i64),
    Sell(i64),
    Reprice(Decimal),
    Archive,
}

impl StockRequest {
    fn operation(self) -> &'static str {
        match self {
            StockRequest::Receive(_) => "receive_stock",
            StockRequest::Sell(_) => "sell_stock",
            StockRequest::Reprice(_) => "reprice_stock",
            StockRequest::Archive => "archive_stock",
        }
    }

    fn plan(self, item: &StockItem) -> DomainResult<StockChange> {
        match self {
            StockRequest::Receive(units) => item.plan_receive(units),
            StockRequest::Sell(units) => item.plan_sell(units),
            StockRequest::Reprice(price) => item.plan_reprice(price),
            StockRequest::Archive => Ok(item.archival_change()),
        }
    }

    /// The change as asked for, unchecked. Recorded on rejected movements.
    fn requested(self, item: &StockItem) -> StockChange {
        let (price_after, quantity_after) = match self {
            StockRequest::Receive(units) => (item.price, item.quantity.saturating_add(units)),
            StockRequest::Sell(units) => (item.price, item.quantity.saturating_sub(units)),
            StockRequest::Reprice(price) => (price, item.quantity),
            StockRequest::Archive => (item.price, item.quantity),
        };
        StockChange {
            price_before: Some(item.price),
            price_after,
            quantity_before: Some(item.quantity),
            quantity_after,
        }
    }

    fn is_delete(self) -> bool {
        matches!(self, StockRequest::Archive)
    }
}

#[derive(Debug, Clone)]
pub struct InventoryService {
    coordinator: TransactionCoordinator,
    stock: EntityStore<StockItem>,
    books: EntityStore<Book>,
    tracker: MovementTracker,
}

impl InventoryService {
    pub fn new(backend: Arc<dyn Backend>, audit: AuditWriter) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(backend.clone(), audit.clone()),
            stock: EntityStore::with_audit(backend.clone(), audit.clone()),
            books: EntityStore::with_audit(backend.clone(), audit),
            tracker: MovementTracker::new(backend),
        }
    }

    pub fn tracker(&self) -> &MovementTracker {
        &self.tracker
    }

    /// Start tracking stock for a book. The opening movement is a PURCHASE,
    /// or OUT_OF_STOCK when the opening quantity is zero.
    #[instrument(skip(self, draft, actor), fields(book_id = %draft.book_id, user_id = %actor.user_id), err)]
    pub async fn open_stock(
        &self,
        draft: StockDraft,
        actor: &MovementActor,
    ) -> StoreResult<(StockItem, InventoryMovement)> {
        draft.validate()?;

        let options = TransactionOptions::named("open_stock")
            .audited(actor.user_id.clone(), StockItem::ENTITY_NAME)
            .action(AuditAction::Create);

        self.coordinator
            .with_transaction(options, move |tx| async move {
                self.books
                    .in_transaction(&tx)
                    .find_by_id(draft.book_id)
                    .await?
                    .ok_or_else(|| StoreError::not_found(Book::ENTITY_NAME, draft.book_id))?;

                let stock = self.stock.in_transaction(&tx);
                stock
                    .validate_unique_constraints(&draft, None, &[UniqueConstraint::single("book_id", STOCK_EXISTS)])
                    .await?;
                let item = stock
                    .create(&draft, Some(stock_audit(actor, "Opened stock")))
                    .await?;

                let change = draft.opening_change();
                let movement_id = self
                    .tracker
                    .create_pending_movement(new_movement(&item, actor, &change, false), &tx)
                    .await?;
                let movement = self
                    .tracker
                    .mark_completed(movement_id, &tx, Some(completion(&change, true, false)))
                    .await?;

                Ok((item, movement))
            })
            .await
    }

    pub async fn receive(&self, stock_id: RecordId, units: i64, actor: &MovementActor) -> StoreResult<MovementOutcome> {
        self.track(stock_id, actor, StockRequest::Receive(units)).await
    }

    pub async fn sell(&self, stock_id: RecordId, units: i64, actor: &MovementActor) -> StoreResult<MovementOutcome> {
        self.track(stock_id, actor, StockRequest::Sell(units)).await
    }

    pub async fn reprice(&self, stock_id: RecordId, price: Decimal, actor: &MovementActor) -> StoreResult<MovementOutcome> {
        self.track(stock_id, actor, StockRequest::Reprice(price)).await
    }

    /// Soft-delete the stock item, tracked as an ARCHIVED movement.
    pub async fn archive(&self, stock_id: RecordId, actor: &MovementActor) -> StoreResult<MovementOutcome> {
        self.track(stock_id, actor, StockRequest::Archive).await
    }

    pub async fn stock(&self, stock_id: RecordId) -> StoreResult<Option<StockItem>> {
        self.stock.find_by_id(stock_id).await
    }

    pub async fn history(&self, stock_id: RecordId, pagination: &Pagination) -> StoreResult<Page<InventoryMovement>> {
        self.tracker.history(stock_id, pagination).await
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id), err)]
    async fn track(
        &self,
        stock_id: RecordId,
        actor: &MovementActor,
        request: StockRequest,
    ) -> StoreResult<MovementOutcome> {
        let options = TransactionOptions::named(request.operation())
            .audited(actor.user_id.clone(), StockItem::ENTITY_NAME);

        let outcome = self
            .coordinator
            .with_transaction(options, move |tx| async move {
                let stock = self.stock.in_transaction(&tx);
                let item = stock
                    .find_by_id(stock_id)
                    .await?
                    .ok_or_else(|| StoreError::not_found(StockItem::ENTITY_NAME, stock_id))?;

                match request.plan(&item) {
                    Ok(change) => self.apply(&tx, &stock, &item, actor, request, change).await,
                    Err(refusal) => self.refuse(&tx, &item, actor, request, refusal.to_string()).await,
                }
            })
            .await?;

        match &outcome {
            MovementOutcome::Completed { movement, .. } => {
                info!(movement_id = %movement.id, movement_type = ?movement.movement_type, "stock movement completed");
            }
            MovementOutcome::Rejected { movement, reason } => {
                warn!(movement_id = %movement.id, %reason, "stock movement rejected");
            }
        }
        Ok(outcome)
    }

    async fn apply(
        &self,
        tx: &Transaction,
        stock: &EntityStore<StockItem>,
        item: &StockItem,
        actor: &MovementActor,
        request: StockRequest,
        change: StockChange,
    ) -> StoreResult<MovementOutcome> {
        let movement_id = self
            .tracker
            .create_pending_movement(new_movement(item, actor, &change, request.is_delete()), tx)
            .await?;

        let updated = if request.is_delete() {
            stock
                .soft_delete(item.id, Some(stock_audit(actor, "Archived stock")))
                .await?;
            stock
                .find_one(Filter::new().eq("id", item.id.to_string()).with_deleted())
                .await?
                .ok_or_else(|| StoreError::not_found(StockItem::ENTITY_NAME, item.id))?
        } else {
            stock
                .update(item.id, &change.patch(), Some(stock_audit(actor, "Updated stock")))
                .await?
        };

        let movement = self
            .tracker
            .mark_completed(movement_id, tx, Some(completion(&change, false, request.is_delete())))
            .await?;

        Ok(MovementOutcome::Completed {
            movement,
            stock: updated,
        })
    }

    async fn refuse(
        &self,
        tx: &Transaction,
        item: &StockItem,
        actor: &MovementActor,
        request: StockRequest,
        reason: String,
    ) -> StoreResult<MovementOutcome> {
        let requested = request.requested(item);
        let movement_id = self
            .tracker
            .create_pending_movement(new_movement(item, actor, &requested, request.is_delete()), tx)
            .await?;
        let movement = self.tracker.mark_error(movement_id, tx, &reason).await?;

        Ok(MovementOutcome::Rejected { movement, reason })
    }
}

fn new_movement(item: &StockItem, actor: &MovementActor, change: &StockChange, is_delete: bool) -> NewMovement {
    NewMovement {
        entity_type: StockItem::ENTITY_NAME.to_string(),
        entity_id: item.id,
        actor: actor.clone(),
        price_before: change.price_before,
        price_after: Some(change.price_after),
        quantity_before: change.quantity_before,
        quantity_after: Some(change.quantity_after),
        movement_type: infer(change, change.price_before.is_none(), is_delete),
        notes: None,
    }
}

fn infer(change: &StockChange, is_create: bool, is_delete: bool) -> MovementType {
    MovementTracker::determine_movement_type(
        is_create,
        is_delete,
        change.price_before,
        Some(change.price_after),
        change.quantity_before,
        Some(change.quantity_after),
    )
}

fn completion(change: &StockChange, is_create: bool, is_delete: bool) -> CompletionValues {
    CompletionValues {
        quantity_after: Some(change.quantity_after),
        price_after: Some(change.price_after),
        movement_type: Some(infer(change, is_create, is_delete)),
    }
}

fn stock_audit(actor: &MovementActor, verb: &'static str) -> AuditOptions<StockItem> {
    AuditOptions::new(actor.user_id.clone(), StockItem::ENTITY_NAME)
        .describe(move |s: &StockItem| format!("{verb}: {} units at {}", s.quantity, s.price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Fault, InMemoryBackend};
    use crate::services::CatalogService;
    use catalog_audit::{AuditEnvironment, MemoryAuditSink};
    use catalog_catalog::BookDraft;
    use catalog_inventory::MovementStatus;

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        inventory: InventoryService,
        book: Book,
        actor: MovementActor,
    }

    async fn fixture() -> Fixture {
        let backend = InMemoryBackend::arc();
        let writer = AuditWriter::new(Arc::new(MemoryAuditSink::new()), AuditEnvironment::current("test"));
        let catalog = CatalogService::new(backend.clone(), writer.clone());
        let book = catalog
            .create_book(BookDraft::new("Dhalgren", "9780375706684"), "u1")
            .await
            .unwrap();
        Fixture {
            inventory: InventoryService::new(backend.clone(), writer),
            backend,
            book,
            actor: MovementActor::new("u1", "Ada Clerk", "STOCK_MANAGER"),
        }
    }

    fn draft(book_id: RecordId, quantity: i64) -> StockDraft {
        StockDraft {
            book_id,
            price: Decimal::new(1500, 2),
            quantity,
        }
    }

    #[tokio::test]
    async fn opening_stock_records_a_completed_purchase() {
        let fx = fixture().await;
        let (item, movement) = fx.inventory.open_stock(draft(fx.book.id, 10), &fx.actor).await.unwrap();

        assert_eq!(item.quantity, 10);
        assert_eq!(movement.status, MovementStatus::Completed);
        assert_eq!(movement.movement_type, MovementType::Purchase);
        assert_eq!(movement.entity_id, item.id);
        assert_eq!(movement.actor.user_full_name, "Ada Clerk");
    }

    #[tokio::test]
    async fn empty_opening_stock_is_out_of_stock() {
        let fx = fixture().await;
        let (_, movement) = fx.inventory.open_stock(draft(fx.book.id, 0), &fx.actor).await.unwrap();
        assert_eq!(movement.movement_type, MovementType::OutOfStock);
    }

    #[tokio::test]
    async fn a_book_is_stocked_once() {
        let fx = fixture().await;
        fx.inventory.open_stock(draft(fx.book.id, 1), &fx.actor).await.unwrap();
        let err = fx.inventory.open_stock(draft(fx.book.id, 1), &fx.actor).await.unwrap_err();
        assert_eq!(err.to_string(), STOCK_EXISTS);
    }

    #[tokio::test]
    async fn selling_out_is_tracked_as_out_of_stock() {
        let fx = fixture().await;
        let (item, _) = fx.inventory.open_stock(draft(fx.book.id, 3), &fx.actor).await.unwrap();

        let outcome = fx.inventory.sell(item.id, 1, &fx.actor).await.unwrap();
        assert_eq!(outcome.movement().movement_type, MovementType::Sale);

        let outcome = fx.inventory.sell(item.id, 2, &fx.actor).await.unwrap();
        match outcome {
            MovementOutcome::Completed { movement, stock } => {
                assert_eq!(stock.quantity, 0);
                assert_eq!(movement.movement_type, MovementType::OutOfStock);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn overselling_commits_an_error_movement_and_keeps_stock() {
        let fx = fixture().await;
        let (item, _) = fx.inventory.open_stock(draft(fx.book.id, 2), &fx.actor).await.unwrap();

        let outcome = fx.inventory.sell(item.id, 5, &fx.actor).await.unwrap();
        let MovementOutcome::Rejected { movement, reason } = outcome else {
            panic!("oversell must be rejected");
        };
        assert_eq!(movement.status, MovementStatus::Error);
        assert_eq!(movement.movement_type, MovementType::Sale);
        assert_eq!(movement.notes.as_deref(), Some(reason.as_str()));

        let stored = fx.inventory.tracker().find(movement.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MovementStatus::Error);
        assert_eq!(fx.inventory.stock(item.id).await.unwrap().unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn oversized_receive_is_rejected_and_keeps_stock() {
        let fx = fixture().await;
        let (item, _) = fx.inventory.open_stock(draft(fx.book.id, 5), &fx.actor).await.unwrap();

        let outcome = fx.inventory.receive(item.id, i64::MAX, &fx.actor).await.unwrap();
        let MovementOutcome::Rejected { movement, reason } = outcome else {
            panic!("overflowing receive must be rejected");
        };
        assert_eq!(movement.status, MovementStatus::Error);
        assert_eq!(movement.movement_type, MovementType::Purchase);
        assert!(reason.contains("overflow"));

        let stored = fx.inventory.tracker().find(movement.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MovementStatus::Error);
        assert_eq!(fx.inventory.stock(item.id).await.unwrap().unwrap().quantity, 5);
    }

    #[tokio::test]
    async fn price_changes_are_increase_or_discount() {
        let fx = fixture().await;
        let (item, _) = fx.inventory.open_stock(draft(fx.book.id, 2), &fx.actor).await.unwrap();

        let up = fx.inventory.reprice(item.id, Decimal::new(2000, 2), &fx.actor).await.unwrap();
        assert_eq!(up.movement().movement_type, MovementType::Increase);
        let down = fx.inventory.reprice(item.id, Decimal::new(999, 2), &fx.actor).await.unwrap();
        assert_eq!(down.movement().movement_type, MovementType::Discount);
    }

    #[tokio::test]
    async fn archiving_is_an_archived_movement() {
        let fx = fixture().await;
        let (item, _) = fx.inventory.open_stock(draft(fx.book.id, 2), &fx.actor).await.unwrap();

        let outcome = fx.inventory.archive(item.id, &fx.actor).await.unwrap();
        assert_eq!(outcome.movement().movement_type, MovementType::Archived);
        assert!(fx.inventory.stock(item.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn infrastructure_failure_rolls_back_movement_and_stock() {
        let fx = fixture().await;
        let (item, _) = fx.inventory.open_stock(draft(fx.book.id, 4), &fx.actor).await.unwrap();
        let movements_before = fx.backend.committed("InventoryMovement").len();

        // First update in the unit is the stock write; the pending row is
        // already staged by then.
        fx.backend.inject(Fault::Update);
        let err = fx.inventory.receive(item.id, 3, &fx.actor).await.unwrap_err();

        assert_eq!(err.to_string(), "failed to update entity");
        assert_eq!(fx.backend.committed("InventoryMovement").len(), movements_before);
        assert_eq!(fx.inventory.stock(item.id).await.unwrap().unwrap().quantity, 4);
        assert_eq!(fx.backend.stats().outstanding(), 0);
    }

    #[tokio::test]
    async fn history_lists_movements_for_one_item() {
        let fx = fixture().await;
        let (item, _) = fx.inventory.open_stock(draft(fx.book.id, 5), &fx.actor).await.unwrap();
        fx.inventory.receive(item.id, 5, &fx.actor).await.unwrap();
        fx.inventory.sell(item.id, 20, &fx.actor).await.unwrap();

        let page = fx.inventory.history(item.id, &Pagination::default()).await.unwrap();
        assert_eq!(page.meta.total, 3);
        let errors = page
            .data
            .iter()
            .filter(|m| m.status == MovementStatus::Error)
            .count();
        assert_eq!(errors, 1);
    }
}
