//! Persisting and reading audit records through the generic store.
//!
//! Records go through an unaudited `EntityStore<AuditRecord>`; auditing the
//! audit trail would recurse. Nothing here updates or deletes a record.

use std::sync::Arc;

use async_trait::async_trait;

use catalog_audit::{AuditError, AuditRecord, AuditResult, AuditSink, NewAuditRecord};
use catalog_core::RecordId;

use crate::backend::{Backend, Filter, SortOrder};
use crate::error::StoreResult;
use crate::store::{EntityStore, Page, Pagination};

#[derive(Debug, Clone)]
pub struct StoreAuditSink {
    store: EntityStore<AuditRecord>,
}

impl StoreAuditSink {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            store: EntityStore::without_audit(backend),
        }
    }
}

#[async_trait]
impl AuditSink for StoreAuditSink {
    fn name(&self) -> &str {
        "store"
    }

    async fn write(&self, record: NewAuditRecord) -> AuditResult<()> {
        self.store
            .create(&record, None)
            .await
            .map(|_| ())
            .map_err(|e| AuditError::sink(self.name(), e.to_string()))
    }
}

/// Read side of the audit trail.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    store: EntityStore<AuditRecord>,
}

impl AuditQuery {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            store: EntityStore::without_audit(backend),
        }
    }

    /// Every record about one entity, oldest first.
    pub async fn find_by_entity(&self, entity_type: &str, entity_id: RecordId) -> StoreResult<Vec<AuditRecord>> {
        let filter = Filter::new()
            .eq("entity_type", entity_type)
            .eq("entity_id", entity_id.to_string());
        let mut records = self.store.find_many(filter).await?;
        records.sort_by_key(|r| (r.created_at, r.id));
        Ok(records)
    }

    pub async fn list(&self, filter: Filter, pagination: &Pagination) -> StoreResult<Page<AuditRecord>> {
        self.store.find_many_paged(filter, pagination).await
    }

    /// Records by one actor, newest first.
    pub async fn by_actor(&self, performed_by: &str, pagination: &Pagination) -> StoreResult<Page<AuditRecord>> {
        let pagination = pagination.clone().sorted_by("created_at", SortOrder::Desc);
        self.list(Filter::new().eq("performed_by", performed_by), &pagination)
            .await
    }
}
