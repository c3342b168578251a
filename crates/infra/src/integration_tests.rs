//! End-to-end tests across store, coordinator, tracker and audit trail.
//!
//! Everything runs on the in-memory backend; connection accounting and fault
//! injection come from it.

use std::sync::Arc;

use anyhow::anyhow;
use rust_decimal::Decimal;
use serde_json::json;

use catalog_audit::{
    AuditAction, AuditEnvironment, AuditOutcome, AuditWriter, MemoryAuditSink,
};
use catalog_catalog::{Author, AuthorDraft, BookAuthor, BookAuthorDraft};
use catalog_core::{DomainError, RecordId};
use catalog_inventory::{
    CompletionValues, MovementActor, MovementStatus, MovementType, NewMovement,
};

use crate::audit_store::{AuditQuery, StoreAuditSink};
use crate::backend::{Fault, Filter, InMemoryBackend};
use crate::error::StoreError;
use crate::movements::MovementTracker;
use crate::store::{AuditOptions, EntityStore, Pagination, UniqueConstraint};
use crate::transaction::{TransactionCoordinator, TransactionOptions};

struct Harness {
    backend: Arc<InMemoryBackend>,
    sink: Arc<MemoryAuditSink>,
    writer: AuditWriter,
}

impl Harness {
    fn new() -> Self {
        Self::with_sink(MemoryAuditSink::new())
    }

    fn with_sink(sink: MemoryAuditSink) -> Self {
        let sink = Arc::new(sink);
        Self {
            backend: InMemoryBackend::arc(),
            writer: AuditWriter::new(sink.clone(), AuditEnvironment::current("test")),
            sink,
        }
    }

    fn coordinator(&self) -> TransactionCoordinator {
        TransactionCoordinator::new(self.backend.clone(), self.writer.clone())
    }

    fn authors(&self) -> EntityStore<Author> {
        EntityStore::with_audit(self.backend.clone(), self.writer.clone())
    }

    fn tracker(&self) -> MovementTracker {
        MovementTracker::new(self.backend.clone())
    }
}

fn audited(performed_by: &str) -> Option<AuditOptions<Author>> {
    Some(AuditOptions::new(performed_by, "Author"))
}

fn movement(entity_id: RecordId) -> NewMovement {
    NewMovement {
        entity_type: "StockItem".to_string(),
        entity_id,
        actor: MovementActor::new("u1", "Ada Clerk", "STOCK_MANAGER"),
        price_before: Some(Decimal::new(1000, 0)),
        price_after: Some(Decimal::new(1000, 0)),
        quantity_before: Some(10),
        quantity_after: Some(7),
        movement_type: MovementType::Sale,
        notes: None,
    }
}

fn boom() -> StoreError {
    StoreError::Unexpected(anyhow!("boom"))
}

#[tokio::test]
async fn create_returns_entity_and_records_one_create_audit() {
    let h = Harness::new();

    let author = h.authors().create(&AuthorDraft::new("X"), audited("u1")).await.unwrap();

    assert_eq!(author.name, "X");
    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, AuditAction::Create);
    assert_eq!(records[0].performed_by, "u1");
    assert_eq!(records[0].entity_id.as_deref(), Some(author.id.to_string().as_str()));
    assert_eq!(records[0].result, AuditOutcome::Success);
}

#[tokio::test]
async fn second_compound_duplicate_is_a_conflict_with_configured_message() {
    let h = Harness::new();
    let links: EntityStore<BookAuthor> = EntityStore::without_audit(h.backend.clone());
    let constraint = [UniqueConstraint::compound(["book_id", "author_id"], "pair already linked")];
    let draft = BookAuthorDraft {
        book_id: RecordId::new(),
        author_id: RecordId::new(),
    };

    links.validate_unique_constraints(&draft, None, &constraint).await.unwrap();
    links.create(&draft, None).await.unwrap();

    let err = links
        .validate_unique_constraints(&draft, None, &constraint)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.to_string(), "pair already linked");
    assert_eq!(h.backend.committed("BookAuthor").len(), 1);
}

#[tokio::test]
async fn third_page_of_twenty_five_holds_the_last_five() {
    let h = Harness::new();
    let authors: EntityStore<Author> = EntityStore::without_audit(h.backend.clone());
    for i in 0..25 {
        authors.create(&AuthorDraft::new(format!("author-{i:02}")), None).await.unwrap();
    }

    let page = authors
        .find_many_paged(Filter::new(), &Pagination::new(3, 10))
        .await
        .unwrap();

    assert_eq!(page.data.len(), 5);
    assert_eq!(page.meta.total, 25);
    assert_eq!(page.meta.total_pages, 3);
    assert!(!page.meta.has_next);
    assert!(page.meta.has_prev);
}

#[tokio::test]
async fn pending_movement_is_gone_when_the_transaction_fails() {
    let h = Harness::new();
    let tracker = h.tracker();
    let stock_id = RecordId::new();

    let err = h
        .coordinator()
        .with_transaction(TransactionOptions::named("sell_stock"), |tx| {
            let tracker = tracker.clone();
            async move {
                tracker.create_pending_movement(movement(stock_id), &tx).await?;
                Err::<(), _>(boom())
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::TransactionFailure { ref operation, .. } if operation == "sell_stock"));
    assert!(h.backend.committed("InventoryMovement").is_empty());
    let history = tracker.history(stock_id, &Pagination::default()).await.unwrap();
    assert_eq!(history.meta.total, 0);
}

#[tokio::test]
async fn excluding_the_owner_id_suppresses_the_conflict() {
    let h = Harness::new();
    let authors = h.authors();
    let constraint = [UniqueConstraint::single("name", "name taken")];
    let existing = authors.create(&AuthorDraft::new("Octavia Butler"), None).await.unwrap();
    let same = AuthorDraft::new("Octavia Butler");

    authors
        .validate_unique_constraints(&same, Some(existing.id), &constraint)
        .await
        .unwrap();
    assert!(authors
        .validate_unique_constraints(&same, None, &constraint)
        .await
        .unwrap_err()
        .is_conflict());
    assert!(authors
        .validate_unique_constraints(&same, Some(RecordId::new()), &constraint)
        .await
        .unwrap_err()
        .is_conflict());
}

#[tokio::test]
async fn failed_transaction_discards_writes_and_releases_once() {
    let h = Harness::new();
    let authors = h.authors();

    let result = h
        .coordinator()
        .with_transaction(TransactionOptions::named("bulk_import"), |tx| {
            let authors = authors.in_transaction(&tx);
            async move {
                authors.create(&AuthorDraft::new("Gene Wolfe"), None).await?;
                authors.create(&AuthorDraft::new("Jack Vance"), None).await?;
                Err::<(), _>(boom())
            }
        })
        .await;

    assert!(result.is_err());
    assert!(h.backend.committed("Author").is_empty());
    assert_eq!(authors.count(None).await.unwrap(), 0);

    let stats = h.backend.stats();
    assert_eq!(stats.rollbacks, 1);
    assert_eq!(stats.acquired, stats.released);
}

#[tokio::test]
async fn successful_transaction_commits_every_write_together() {
    let h = Harness::new();
    let authors = h.authors();

    let created = h
        .coordinator()
        .with_transaction(TransactionOptions::named("bulk_import"), |tx| {
            let authors = authors.in_transaction(&tx);
            async move {
                let a = authors.create(&AuthorDraft::new("Gene Wolfe"), None).await?;
                let b = authors.create(&AuthorDraft::new("Jack Vance"), None).await?;
                Ok(vec![a.id, b.id])
            }
        })
        .await
        .unwrap();

    assert_eq!(created.len(), 2);
    assert_eq!(h.backend.committed("Author").len(), 2);
    assert_eq!(h.backend.stats().outstanding(), 0);
}

#[tokio::test]
async fn a_movement_resolves_exactly_once() {
    let h = Harness::new();
    let tracker = h.tracker();
    let stock_id = RecordId::new();

    let (id, second) = h
        .coordinator()
        .with_transaction(TransactionOptions::named("sell_stock"), |tx| {
            let tracker = tracker.clone();
            async move {
                let id = tracker.create_pending_movement(movement(stock_id), &tx).await?;
                tracker.mark_completed(id, &tx, None).await?;
                let second = tracker.mark_error(id, &tx, "late failure").await;
                Ok((id, second))
            }
        })
        .await
        .unwrap();

    assert!(matches!(
        second,
        Err(StoreError::Domain(DomainError::InvariantViolation(_)))
    ));
    let stored = tracker.find(id).await.unwrap().unwrap();
    assert_eq!(stored.status, MovementStatus::Completed);
    assert!(stored.notes.is_none());
}

#[tokio::test]
async fn zero_quantity_completion_is_stored_as_out_of_stock() {
    let h = Harness::new();
    let tracker = h.tracker();

    let completed = h
        .coordinator()
        .with_transaction(TransactionOptions::named("sell_stock"), |tx| {
            let tracker = tracker.clone();
            async move {
                let id = tracker.create_pending_movement(movement(RecordId::new()), &tx).await?;
                let values = CompletionValues {
                    quantity_after: Some(0),
                    movement_type: Some(MovementType::Sale),
                    ..CompletionValues::default()
                };
                tracker.mark_completed(id, &tx, Some(values)).await
            }
        })
        .await
        .unwrap();

    assert_eq!(completed.movement_type, MovementType::OutOfStock);
    let stored = tracker.find(completed.id).await.unwrap().unwrap();
    assert_eq!(stored.movement_type, MovementType::OutOfStock);
    assert_eq!(stored.quantity_after, Some(0));
}

#[tokio::test]
async fn pending_zero_quantity_completed_without_values_is_out_of_stock() {
    let h = Harness::new();
    let tracker = h.tracker();

    let completed = h
        .coordinator()
        .with_transaction(TransactionOptions::named("sell_stock"), |tx| {
            let tracker = tracker.clone();
            async move {
                let draft = NewMovement {
                    quantity_after: Some(0),
                    ..movement(RecordId::new())
                };
                let id = tracker.create_pending_movement(draft, &tx).await?;
                tracker.mark_completed(id, &tx, None).await
            }
        })
        .await
        .unwrap();

    assert_eq!(completed.movement_type, MovementType::OutOfStock);
    let stored = tracker.find(completed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, MovementStatus::Completed);
    assert_eq!(stored.movement_type, MovementType::OutOfStock);
    assert_eq!(stored.quantity_after, Some(0));
}

#[test]
fn movement_type_inference_matches_the_documented_table() {
    let d = |v| Some(Decimal::new(v, 0));
    assert_eq!(
        MovementTracker::determine_movement_type(true, false, None, None, None, None),
        MovementType::Purchase
    );
    assert_eq!(
        MovementTracker::determine_movement_type(false, true, d(1000), d(1500), Some(10), Some(0)),
        MovementType::Archived
    );
    assert_eq!(
        MovementTracker::determine_movement_type(false, false, d(1000), d(1500), Some(10), Some(10)),
        MovementType::Increase
    );
    assert_eq!(
        MovementTracker::determine_movement_type(false, false, d(1000), d(1000), Some(15), Some(10)),
        MovementType::Sale
    );
}

#[tokio::test]
async fn rejecting_audit_sink_never_fails_the_write() {
    let h = Harness::with_sink(MemoryAuditSink::failing());

    let author = h.authors().create(&AuthorDraft::new("Tanith Lee"), audited("u1")).await.unwrap();

    assert_eq!(h.backend.committed("Author").len(), 1);
    assert_eq!(author.name, "Tanith Lee");
}

#[tokio::test]
async fn rollback_failure_keeps_the_original_error() {
    let h = Harness::new();
    h.backend.inject(Fault::Rollback);

    let err = h
        .coordinator()
        .with_transaction(TransactionOptions::named("rename"), |_tx| async move {
            Err::<(), _>(StoreError::Validation("name cannot be empty".to_string()))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Validation(ref m) if m == "name cannot be empty"));
    assert_eq!(h.backend.stats().outstanding(), 0);
}

#[tokio::test]
async fn release_failure_does_not_change_the_result() {
    let h = Harness::new();
    h.backend.inject(Fault::Release);

    let value = h
        .coordinator()
        .with_transaction(TransactionOptions::named("noop"), |_tx| async move { Ok(42) })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(h.backend.stats().commits, 1);
}

#[tokio::test]
async fn commit_failure_is_a_transaction_failure_and_nothing_persists() {
    let h = Harness::new();
    let authors = h.authors();
    h.backend.inject(Fault::Commit);

    let err = h
        .coordinator()
        .with_transaction(TransactionOptions::named("import"), |tx| {
            let authors = authors.in_transaction(&tx);
            async move { authors.create(&AuthorDraft::new("M. John Harrison"), None).await }
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "transaction failed during import");
    assert!(h.backend.committed("Author").is_empty());
    assert_eq!(h.backend.stats().outstanding(), 0);
}

#[tokio::test]
async fn begin_failure_is_a_transaction_failure() {
    let h = Harness::new();
    h.backend.inject(Fault::Begin);

    let err = h
        .coordinator()
        .with_transaction(TransactionOptions::named("import"), |_tx| async move { Ok(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::TransactionFailure { .. }));
    assert_eq!(h.backend.stats().acquired, 0);
}

#[tokio::test]
async fn recognized_errors_cross_the_transaction_unchanged() {
    let h = Harness::new();
    let authors = h.authors();
    authors.create(&AuthorDraft::new("Joanna Russ"), None).await.unwrap();

    let err = h
        .coordinator()
        .with_transaction(TransactionOptions::named("create_author"), |tx| {
            let authors = authors.in_transaction(&tx);
            async move {
                authors
                    .validate_unique_constraints(
                        &AuthorDraft::new("joanna russ"),
                        None,
                        &[UniqueConstraint::single("name", "An author with this name already exists")],
                    )
                    .await
            }
        })
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(err.to_string(), "An author with this name already exists");
}

#[tokio::test]
async fn audited_transactions_record_started_then_outcome() {
    let h = Harness::new();
    let coordinator = h.coordinator();

    coordinator
        .with_transaction(
            TransactionOptions::named("reprice").audited("u7", "StockItem"),
            |_tx| async move { Ok(()) },
        )
        .await
        .unwrap();
    coordinator
        .with_transaction(
            TransactionOptions::named("reprice").audited("u7", "StockItem"),
            |_tx| async move { Err::<(), _>(boom()) },
        )
        .await
        .unwrap_err();

    let outcomes: Vec<_> = h
        .sink
        .records()
        .into_iter()
        .filter(|r| r.execution_context == "TransactionCoordinator")
        .map(|r| r.result)
        .collect();
    assert_eq!(
        outcomes,
        vec![
            AuditOutcome::Started,
            AuditOutcome::Success,
            AuditOutcome::Started,
            AuditOutcome::Error,
        ]
    );
    let failed = h.sink.records().into_iter().last().unwrap();
    assert_eq!(failed.performed_by, "u7");
    assert_eq!(failed.error_details.as_deref(), Some("boom"));
}

#[tokio::test]
async fn audit_trail_is_persisted_and_queryable_through_the_store() {
    let backend = InMemoryBackend::arc();
    let writer = AuditWriter::new(
        Arc::new(StoreAuditSink::new(backend.clone())),
        AuditEnvironment::current("test"),
    );
    let authors: EntityStore<Author> = EntityStore::with_audit(backend.clone(), writer);

    let author = authors.create(&AuthorDraft::new("Ursula K. Le Guin"), audited("u1")).await.unwrap();
    let opts = AuditOptions::new("u2", "Author").describe(|a: &Author| format!("renamed to {}", a.name));
    authors
        .update(
            author.id,
            &catalog_catalog::AuthorPatch {
                name: Some("Ursula Le Guin".to_string()),
                ..Default::default()
            },
            Some(opts),
        )
        .await
        .unwrap();

    let query = AuditQuery::new(backend.clone());
    let trail = query.find_by_entity("Author", author.id).await.unwrap();
    let actions: Vec<_> = trail.iter().map(|r| r.action).collect();
    assert_eq!(actions, vec![AuditAction::Create, AuditAction::Update]);
    assert_eq!(trail[1].details, "renamed to Ursula Le Guin");

    let by_u2 = query.by_actor("u2", &Pagination::default()).await.unwrap();
    assert_eq!(by_u2.meta.total, 1);
    assert_eq!(backend.committed("AuditRecord").len(), 2);
}

#[tokio::test]
async fn transaction_scoped_audit_survives_a_rollback() {
    let backend = InMemoryBackend::arc();
    let writer = AuditWriter::new(
        Arc::new(StoreAuditSink::new(backend.clone())),
        AuditEnvironment::current("test"),
    );
    let coordinator = TransactionCoordinator::new(backend.clone(), writer.clone());
    let authors: EntityStore<Author> = EntityStore::with_audit(backend.clone(), writer);

    coordinator
        .with_transaction(TransactionOptions::named("import"), |tx| {
            let authors = authors.in_transaction(&tx);
            async move {
                authors.create(&AuthorDraft::new("Samuel Delany"), audited("u1")).await?;
                Err::<(), _>(boom())
            }
        })
        .await
        .unwrap_err();

    assert!(backend.committed("Author").is_empty());
    let records = backend.committed("AuditRecord");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("action"), Some(&json!("CREATE")));
}
