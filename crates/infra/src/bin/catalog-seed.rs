//! Seed a catalog backend with demo data.
//!
//! Reads `CATALOG_*` variables, connects the configured backend and writes a
//! publisher, two authors, a book and its opening stock, audited under the
//! `seed` user.

use std::sync::Arc;

use anyhow::Context;
use rust_decimal::Decimal;

use catalog_audit::{AuditSink, AuditWriter, FanoutSink, TracingAuditSink};
use catalog_catalog::{AuthorDraft, BookDraft, PublisherDraft};
use catalog_infra::{CatalogService, InventoryService, StoreAuditSink, StoreConfig};
use catalog_inventory::{MovementActor, StockDraft};

const SEED_USER: &str = "seed";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = StoreConfig::from_env().context("invalid configuration")?;
    catalog_observability::init(&config.logging);

    let backend = config.connect().await.context("failed to connect backend")?;
    let sinks: Vec<Arc<dyn AuditSink>> = vec![
        Arc::new(StoreAuditSink::new(backend.clone())),
        Arc::new(TracingAuditSink),
    ];
    let audit = AuditWriter::new(Arc::new(FanoutSink::new(sinks)), config.audit_environment());

    let catalog = CatalogService::new(backend.clone(), audit.clone());
    let inventory = InventoryService::new(backend, audit);

    let publisher = catalog
        .create_publisher(PublisherDraft::new("Gollancz"), SEED_USER)
        .await?;
    let le_guin = catalog
        .create_author(AuthorDraft::new("Ursula K. Le Guin"), SEED_USER)
        .await?;
    let wolfe = catalog
        .create_author(AuthorDraft::new("Gene Wolfe"), SEED_USER)
        .await?;

    let (book, links) = catalog
        .create_book_with_authors(
            BookDraft::new("The Dispossessed", "978-0-06-051275-1").published_by(publisher.id),
            &[le_guin.id, wolfe.id],
            SEED_USER,
        )
        .await?;

    let actor = MovementActor::new(SEED_USER, "Catalog Seeder", "ADMIN");
    let (stock, movement) = inventory
        .open_stock(
            StockDraft {
                book_id: book.id,
                price: Decimal::new(1299, 2),
                quantity: 12,
            },
            &actor,
        )
        .await?;

    tracing::info!(
        book_id = %book.id,
        links = links.len(),
        stock_id = %stock.id,
        movement_id = %movement.id,
        environment = %config.environment,
        "seed complete"
    );
    Ok(())
}
