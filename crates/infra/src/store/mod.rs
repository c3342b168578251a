//! Generic audited repository over one entity type.
//!
//! An [`EntityStore`] either draws a fresh session from the backend for every
//! call (committing on success, rolling back on failure, always releasing)
//! or is bound to a caller's [`Transaction`] via
//! [`EntityStore::in_transaction`], in which case it never commits or
//! releases on its own.
//!
//! Mutating calls take `Option<AuditOptions<T>>`: `Some` records the action
//! through the store's [`AuditWriter`], `None` skips auditing. Stores built
//! with [`EntityStore::without_audit`] never audit, which is what the audit
//! subsystem itself uses to persist records.

pub mod lookup;
pub mod options;
pub mod pagination;
pub mod unique;

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, error, instrument, warn};

use catalog_audit::{AuditAction, AuditEntry, AuditWriter};
use catalog_core::{Entity, RecordId};

use crate::backend::{Backend, BackendError, Document, Filter, Query, Session, DELETED_AT};
use crate::error::{StoreError, StoreResult, Verb};
use crate::transaction::{elapsed_ms, Transaction};

pub use lookup::{LookupOptions, Transform};
pub use options::AuditOptions;
pub use pagination::{Page, PageMeta, Pagination};
pub use unique::UniqueConstraint;

type SessionFuture<'s, R> = Pin<Box<dyn Future<Output = StoreResult<R>> + Send + 's>>;

/// Result of a soft delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    pub id: RecordId,
}

#[derive(Clone)]
enum Source {
    Pool(Arc<dyn Backend>),
    Scoped(Transaction),
}

pub struct EntityStore<T> {
    source: Source,
    audit: Option<AuditWriter>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityStore<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            audit: self.audit.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> std::fmt::Debug for EntityStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            Source::Pool(backend) => backend.name().to_string(),
            Source::Scoped(tx) => format!("transaction:{}", tx.operation()),
        };
        f.debug_struct("EntityStore")
            .field("entity", &T::ENTITY_NAME)
            .field("source", &source)
            .field("audited", &self.audit.is_some())
            .finish()
    }
}

impl<T: Entity> EntityStore<T> {
    pub fn with_audit(backend: Arc<dyn Backend>, writer: AuditWriter) -> Self {
        Self {
            source: Source::Pool(backend),
            audit: Some(writer),
            _entity: PhantomData,
        }
    }

    pub fn without_audit(backend: Arc<dyn Backend>) -> Self {
        Self {
            source: Source::Pool(backend),
            audit: None,
            _entity: PhantomData,
        }
    }

    /// Same store, bound to `tx`. Keeps this store's audit writer.
    pub fn in_transaction(&self, tx: &Transaction) -> Self {
        Self {
            source: Source::Scoped(tx.clone()),
            audit: self.audit.clone(),
            _entity: PhantomData,
        }
    }

    pub fn is_audited(&self) -> bool {
        self.audit.is_some()
    }

    pub fn is_scoped(&self) -> bool {
        matches!(self.source, Source::Scoped(_))
    }

    #[instrument(skip_all, fields(entity_type = T::ENTITY_NAME), err)]
    pub async fn create(&self, draft: &T::Draft, audit: Option<AuditOptions<T>>) -> StoreResult<T> {
        let started = Instant::now();
        let action = audit
            .as_ref()
            .map_or(AuditAction::Create, AuditOptions::create_action);

        match self.insert(draft).await {
            Ok(entity) => {
                debug!(entity_id = %entity.id(), "entity created");
                self.audit_success(audit, action, &entity, true, started).await;
                Ok(entity)
            }
            Err(err) => {
                self.audit_failure(audit, action, None, &err, started).await;
                Err(err)
            }
        }
    }

    /// `Ok(None)` when absent; only infrastructure failures are errors.
    #[instrument(skip_all, fields(entity_type = T::ENTITY_NAME, entity_id = %id), err)]
    pub async fn find_by_id(&self, id: RecordId) -> StoreResult<Option<T>> {
        self.find_one(id_filter(id)).await
    }

    pub async fn find_one(&self, filter: Filter) -> StoreResult<Option<T>> {
        let docs = self.fetch(Query::filtered(filter).window(0, 1)).await?;
        docs.into_iter()
            .next()
            .map(|doc| from_document(doc, Verb::Retrieve))
            .transpose()
    }

    pub async fn find_many(&self, filter: Filter) -> StoreResult<Vec<T>> {
        let docs = self.fetch(Query::filtered(filter)).await?;
        docs.into_iter()
            .map(|doc| from_document(doc, Verb::Retrieve))
            .collect()
    }

    #[instrument(skip_all, fields(entity_type = T::ENTITY_NAME, page = pagination.page, limit = pagination.limit), err)]
    pub async fn find_many_paged(&self, filter: Filter, pagination: &Pagination) -> StoreResult<Page<T>> {
        pagination.validate()?;

        let entity = T::ENTITY_NAME;
        let query = Query::filtered(filter)
            .sorted(pagination.sort_by.clone(), pagination.sort_order)
            .window(pagination.offset(), pagination.limit);

        let (total, docs) = self
            .with_session(Verb::Retrieve, move |s| {
                Box::pin(async move {
                    let total = s.count(entity, &query.filter).await.map_err(infra(Verb::Retrieve))?;
                    let docs = s.find(entity, &query).await.map_err(infra(Verb::Retrieve))?;
                    Ok((total, docs))
                })
            })
            .await?;

        let data = docs
            .into_iter()
            .map(|doc| from_document(doc, Verb::Retrieve))
            .collect::<StoreResult<Vec<T>>>()?;

        Ok(Page {
            data,
            meta: PageMeta::new(total, pagination.page, pagination.limit),
        })
    }

    /// Apply a partial update and return the re-read entity.
    #[instrument(skip_all, fields(entity_type = T::ENTITY_NAME, entity_id = %id), err)]
    pub async fn update(
        &self,
        id: RecordId,
        patch: &T::Patch,
        audit: Option<AuditOptions<T>>,
    ) -> StoreResult<T> {
        let started = Instant::now();
        let result = match to_document(patch, Verb::Update) {
            Ok(mut doc) => {
                doc.remove("id");
                doc.insert("updated_at".to_string(), now_value());
                self.patch_live(id, doc, Verb::Update).await
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(entity) => {
                self.audit_success(audit, AuditAction::Update, &entity, true, started).await;
                Ok(entity)
            }
            Err(err) => {
                self.audit_failure(audit, AuditAction::Update, Some(id), &err, started).await;
                Err(err)
            }
        }
    }

    /// Mark the entity deleted. Audit details come from the pre-delete state.
    #[instrument(skip_all, fields(entity_type = T::ENTITY_NAME, entity_id = %id), err)]
    pub async fn soft_delete(&self, id: RecordId, audit: Option<AuditOptions<T>>) -> StoreResult<Deleted> {
        let started = Instant::now();
        let entity = T::ENTITY_NAME;

        let result = self
            .with_session(Verb::Delete, move |s| {
                Box::pin(async move {
                    let before = fetch_one(s, entity, id_filter(id), Verb::Delete)
                        .await?
                        .ok_or_else(|| StoreError::not_found(entity, id))?;

                    let now = now_value();
                    let mut patch = Document::new();
                    patch.insert(DELETED_AT.to_string(), now.clone());
                    patch.insert("updated_at".to_string(), now);
                    s.update(entity, id, patch).await.map_err(infra(Verb::Delete))?;
                    Ok(before)
                })
            })
            .await
            .and_then(|doc| from_document::<T>(doc, Verb::Delete));

        match result {
            Ok(before) => {
                debug!("entity soft-deleted");
                self.audit_success(audit, AuditAction::Delete, &before, false, started).await;
                Ok(Deleted { id })
            }
            Err(err) => {
                self.audit_failure(audit, AuditAction::Delete, Some(id), &err, started).await;
                Err(err)
            }
        }
    }

    /// Clear `deleted_at`. Restoring a live entity returns it unchanged.
    #[instrument(skip_all, fields(entity_type = T::ENTITY_NAME, entity_id = %id), err)]
    pub async fn restore(&self, id: RecordId, audit: Option<AuditOptions<T>>) -> StoreResult<T> {
        let started = Instant::now();
        let entity = T::ENTITY_NAME;

        let result = self
            .with_session(Verb::Restore, move |s| {
                Box::pin(async move {
                    let filter = id_filter(id).with_deleted();
                    let current = fetch_one(s, entity, filter.clone(), Verb::Restore)
                        .await?
                        .ok_or_else(|| StoreError::not_found(entity, id))?;
                    if matches!(current.get(DELETED_AT), None | Some(JsonValue::Null)) {
                        return Ok(current);
                    }

                    let mut patch = Document::new();
                    patch.insert(DELETED_AT.to_string(), JsonValue::Null);
                    patch.insert("updated_at".to_string(), now_value());
                    s.update(entity, id, patch).await.map_err(infra(Verb::Restore))?;
                    fetch_one(s, entity, filter, Verb::Restore)
                        .await?
                        .ok_or_else(|| StoreError::not_found(entity, id))
                })
            })
            .await
            .and_then(|doc| from_document::<T>(doc, Verb::Restore));

        match result {
            Ok(restored) => {
                self.audit_success(audit, AuditAction::Update, &restored, true, started).await;
                Ok(restored)
            }
            Err(err) => {
                self.audit_failure(audit, AuditAction::Update, Some(id), &err, started).await;
                Err(err)
            }
        }
    }

    pub async fn count(&self, filter: Option<Filter>) -> StoreResult<u64> {
        let entity = T::ENTITY_NAME;
        let filter = filter.unwrap_or_default();
        self.with_session(Verb::Count, move |s| {
            Box::pin(async move { s.count(entity, &filter).await.map_err(infra(Verb::Count)) })
        })
        .await
    }

    pub async fn exists(&self, filter: Filter) -> StoreResult<bool> {
        Ok(self.count(Some(filter)).await? > 0)
    }

    /// Check `candidate` against each constraint; the first one matching a
    /// live row other than `exclude_id` fails with its message as `Conflict`.
    #[instrument(skip_all, fields(entity_type = T::ENTITY_NAME), err)]
    pub async fn validate_unique_constraints(
        &self,
        candidate: &impl Serialize,
        exclude_id: Option<RecordId>,
        constraints: &[UniqueConstraint],
    ) -> StoreResult<()> {
        let doc = to_document(candidate, Verb::Retrieve)?;
        let checks: Vec<(Filter, String)> = constraints
            .iter()
            .filter_map(|c| c.lookup(&doc, exclude_id).map(|f| (f, c.message().to_string())))
            .collect();
        if checks.is_empty() {
            return Ok(());
        }

        let entity = T::ENTITY_NAME;
        let conflict = self
            .with_session(Verb::Retrieve, move |s| {
                Box::pin(async move {
                    for (filter, message) in checks {
                        if s.count(entity, &filter).await.map_err(infra(Verb::Retrieve))? > 0 {
                            return Ok(Some(message));
                        }
                    }
                    Ok(None)
                })
            })
            .await?;

        match conflict {
            Some(message) => {
                debug!(%message, "uniqueness violation");
                Err(StoreError::Conflict(message))
            }
            None => Ok(()),
        }
    }

    pub async fn find_by_field(
        &self,
        field: &str,
        value: impl Into<JsonValue>,
        options: &LookupOptions,
    ) -> StoreResult<Option<T>> {
        let value = value.into();
        self.find_one(options.filter_for([(field, &value)])).await
    }

    pub async fn exists_by_field(
        &self,
        field: &str,
        value: impl Into<JsonValue>,
        options: &LookupOptions,
    ) -> StoreResult<bool> {
        let value = value.into();
        self.exists(options.filter_for([(field, &value)])).await
    }

    pub async fn find_by_fields(
        &self,
        fields: &[(&str, JsonValue)],
        options: &LookupOptions,
    ) -> StoreResult<Option<T>> {
        let filter = options.filter_for(fields.iter().map(|(f, v)| (*f, v)));
        self.find_one(filter).await
    }

    async fn insert(&self, draft: &T::Draft) -> StoreResult<T> {
        let mut doc = to_document(draft, Verb::Create)?;
        let now = now_value();
        doc.insert("id".to_string(), JsonValue::String(RecordId::new().to_string()));
        doc.insert("created_at".to_string(), now.clone());
        doc.insert("updated_at".to_string(), now);
        doc.insert(DELETED_AT.to_string(), JsonValue::Null);

        let entity = T::ENTITY_NAME;
        let stored = self
            .with_session(Verb::Create, move |s| {
                Box::pin(async move {
                    s.insert(entity, doc.clone()).await.map_err(infra(Verb::Create))?;
                    Ok(doc)
                })
            })
            .await?;
        from_document(stored, Verb::Create)
    }

    /// Merge `patch` into a live row and return the re-read row.
    async fn patch_live(&self, id: RecordId, patch: Document, verb: Verb) -> StoreResult<T> {
        let entity = T::ENTITY_NAME;
        let stored = self
            .with_session(verb, move |s| {
                Box::pin(async move {
                    if fetch_one(s, entity, id_filter(id), verb).await?.is_none() {
                        return Err(StoreError::not_found(entity, id));
                    }
                    s.update(entity, id, patch).await.map_err(infra(verb))?;
                    fetch_one(s, entity, id_filter(id), verb)
                        .await?
                        .ok_or_else(|| StoreError::not_found(entity, id))
                })
            })
            .await?;
        from_document(stored, verb)
    }

    async fn fetch(&self, query: Query) -> StoreResult<Vec<Document>> {
        let entity = T::ENTITY_NAME;
        self.with_session(Verb::Retrieve, move |s| {
            Box::pin(async move { s.find(entity, &query).await.map_err(infra(Verb::Retrieve)) })
        })
        .await
    }

    /// Run `f` against a session.
    ///
    /// Pool mode: fresh session, commit on `Ok`, rollback on `Err`, always
    /// released. Scoped mode: the transaction's session, left open.
    async fn with_session<R, F>(&self, verb: Verb, f: F) -> StoreResult<R>
    where
        F: for<'s> FnOnce(&'s mut dyn Session) -> SessionFuture<'s, R>,
    {
        match &self.source {
            Source::Pool(backend) => {
                let mut session = backend.begin().await.map_err(infra(verb))?;
                let result = match f(session.as_mut()).await {
                    Ok(value) => session.commit().await.map(|()| value).map_err(infra(verb)),
                    Err(err) => {
                        if let Err(e) = session.rollback().await {
                            error!(entity_type = T::ENTITY_NAME, %verb, error = %e, "rollback failed");
                        }
                        Err(err)
                    }
                };
                if let Err(e) = session.release().await {
                    warn!(entity_type = T::ENTITY_NAME, %verb, error = %e, "failed to release connection");
                }
                result
            }
            Source::Scoped(tx) => {
                let mut slot = tx.lock().await;
                let session = slot.session().map_err(infra(verb))?;
                f(session).await
            }
        }
    }

    async fn audit_success(
        &self,
        audit: Option<AuditOptions<T>>,
        action: AuditAction,
        entity: &T,
        with_snapshot: bool,
        started: Instant,
    ) {
        let (Some(writer), Some(options)) = (&self.audit, audit) else {
            return;
        };

        let id = entity.id().to_string();
        let mut entry = AuditEntry::new(options.performed_by.clone(), action, options.entity_name.clone())
            .entity_id(&id)
            .details(options.details(entity, action, &id))
            .ip_address(options.ip_address.clone())
            .context(repository_context::<T>())
            .elapsed_ms(elapsed_ms(started));
        if with_snapshot {
            match serde_json::to_value(entity) {
                Ok(snapshot) => entry = entry.snapshot(snapshot),
                Err(e) => warn!(entity_type = T::ENTITY_NAME, error = %e, "entity snapshot skipped"),
            }
        }

        writer.notify(entry).await;
    }

    async fn audit_failure(
        &self,
        audit: Option<AuditOptions<T>>,
        action: AuditAction,
        id: Option<RecordId>,
        err: &StoreError,
        started: Instant,
    ) {
        let (Some(writer), Some(options)) = (&self.audit, audit) else {
            return;
        };

        let mut entry = AuditEntry::new(options.performed_by, action, options.entity_name.clone())
            .details(format!("{action} {} failed", options.entity_name))
            .ip_address(options.ip_address)
            .context(repository_context::<T>())
            .elapsed_ms(elapsed_ms(started))
            .failed(err.to_string());
        if let Some(id) = id {
            entry = entry.entity_id(id);
        }

        writer.notify(entry).await;
    }
}

fn repository_context<T: Entity>() -> String {
    format!("{}Repository", T::ENTITY_NAME)
}

fn id_filter(id: RecordId) -> Filter {
    Filter::new().eq("id", id.to_string())
}

fn now_value() -> JsonValue {
    JsonValue::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Backend failures become opaque infrastructure errors here, once.
fn infra(verb: Verb) -> impl Fn(BackendError) -> StoreError {
    move |e| {
        error!(%verb, error = %e, "backend operation failed");
        StoreError::infrastructure(verb, e)
    }
}

async fn fetch_one(
    session: &mut dyn Session,
    entity: &str,
    filter: Filter,
    verb: Verb,
) -> StoreResult<Option<Document>> {
    let query = Query::filtered(filter).window(0, 1);
    let docs = session.find(entity, &query).await.map_err(infra(verb))?;
    Ok(docs.into_iter().next())
}

fn to_document(value: &impl Serialize, verb: Verb) -> StoreResult<Document> {
    match serde_json::to_value(value) {
        Ok(JsonValue::Object(doc)) => Ok(doc),
        Ok(other) => Err(StoreError::infrastructure(
            verb,
            BackendError::Malformed(format!("expected an object, got {other}")),
        )),
        Err(e) => Err(StoreError::infrastructure(verb, BackendError::Malformed(e.to_string()))),
    }
}

fn from_document<T: DeserializeOwned>(doc: Document, verb: Verb) -> StoreResult<T> {
    serde_json::from_value(JsonValue::Object(doc))
        .map_err(|e| StoreError::infrastructure(verb, BackendError::Malformed(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Fault, InMemoryBackend, SortOrder};
    use catalog_audit::{AuditEnvironment, AuditOutcome, MemoryAuditSink};
    use catalog_catalog::{Author, AuthorDraft, AuthorPatch};

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        sink: Arc<MemoryAuditSink>,
        authors: EntityStore<Author>,
    }

    fn fixture() -> Fixture {
        let backend = InMemoryBackend::arc();
        let sink = Arc::new(MemoryAuditSink::new());
        let writer = AuditWriter::new(sink.clone(), AuditEnvironment::current("test"));
        let authors = EntityStore::with_audit(backend.clone(), writer);
        Fixture { backend, sink, authors }
    }

    fn audited() -> Option<AuditOptions<Author>> {
        Some(AuditOptions::new("u1", "Author").describe(|a: &Author| format!("created {}", a.name)))
    }

    #[tokio::test]
    async fn create_assigns_id_and_audits_with_snapshot() {
        let fx = fixture();
        let author = fx.authors.create(&AuthorDraft::new("N. K. Jemisin"), audited()).await.unwrap();

        let found = fx.authors.find_by_id(author.id).await.unwrap().unwrap();
        assert_eq!(found.name, "N. K. Jemisin");

        let records = fx.sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, AuditAction::Create);
        assert_eq!(records[0].details, "created N. K. Jemisin");
        assert_eq!(records[0].execution_context, "AuthorRepository");
        assert_eq!(records[0].entity_id.as_deref(), Some(author.id.to_string().as_str()));
        assert!(records[0].entity_snapshot.is_some());
        assert_eq!(fx.backend.stats().outstanding(), 0);
    }

    #[tokio::test]
    async fn register_option_changes_the_create_action() {
        let fx = fixture();
        fx.authors
            .create(&AuthorDraft::new("Ted Chiang"), Some(AuditOptions::new("u1", "Author").register()))
            .await
            .unwrap();
        assert_eq!(fx.sink.records()[0].action, AuditAction::Register);
    }

    #[tokio::test]
    async fn unaudited_calls_leave_no_records() {
        let fx = fixture();
        fx.authors.create(&AuthorDraft::new("Ted Chiang"), None).await.unwrap();
        assert!(fx.sink.records().is_empty());
    }

    #[tokio::test]
    async fn create_failure_is_opaque_and_audited_as_error() {
        let fx = fixture();
        fx.backend.inject(Fault::Insert);

        let err = fx.authors.create(&AuthorDraft::new("X"), audited()).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to create entity");

        let records = fx.sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].result, AuditOutcome::Error);
        assert_eq!(records[0].error_details.as_deref(), Some("failed to create entity"));
        assert_eq!(fx.backend.stats().outstanding(), 0);
    }

    #[tokio::test]
    async fn update_returns_the_re_read_entity() {
        let fx = fixture();
        let author = fx.authors.create(&AuthorDraft::new("Le Guin"), None).await.unwrap();

        let patch = AuthorPatch {
            name: Some("Ursula K. Le Guin".to_string()),
            ..AuthorPatch::default()
        };
        let updated = fx.authors.update(author.id, &patch, None).await.unwrap();

        assert_eq!(updated.name, "Ursula K. Le Guin");
        assert_eq!(updated.timestamps.created_at, author.timestamps.created_at);
        assert!(updated.timestamps.updated_at >= author.timestamps.updated_at);
    }

    #[tokio::test]
    async fn update_and_delete_of_missing_rows_are_not_found() {
        let fx = fixture();
        let missing = RecordId::new();

        let err = fx.authors.update(missing, &AuthorPatch::default(), None).await.unwrap_err();
        assert!(err.is_not_found());
        let err = fx.authors.soft_delete(missing, None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn soft_delete_hides_and_restore_brings_back() {
        let fx = fixture();
        let author = fx.authors.create(&AuthorDraft::new("Banks"), None).await.unwrap();

        let deleted = fx.authors.soft_delete(author.id, audited()).await.unwrap();
        assert_eq!(deleted.id, author.id);
        assert!(fx.authors.find_by_id(author.id).await.unwrap().is_none());
        assert_eq!(fx.authors.count(None).await.unwrap(), 0);
        assert!(fx.authors.soft_delete(author.id, None).await.unwrap_err().is_not_found());

        let delete_record = fx.sink.records().pop().unwrap();
        assert_eq!(delete_record.action, AuditAction::Delete);
        assert_eq!(delete_record.details, "created Banks");
        assert!(delete_record.entity_snapshot.is_none());

        let restored = fx.authors.restore(author.id, None).await.unwrap();
        assert!(restored.timestamps.deleted_at.is_none());
        assert!(fx.authors.exists(id_filter(author.id)).await.unwrap());
    }

    #[tokio::test]
    async fn paged_reads_honour_sort_and_window() {
        let fx = fixture();
        for name in ["c", "a", "d", "b", "e"] {
            fx.authors.create(&AuthorDraft::new(name), None).await.unwrap();
        }

        let pagination = Pagination::new(2, 2).sorted_by("name", SortOrder::Asc);
        let page = fx.authors.find_many_paged(Filter::new(), &pagination).await.unwrap();

        let names: Vec<_> = page.data.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["c", "d"]);
        assert_eq!(page.meta.total, 5);
        assert_eq!(page.meta.total_pages, 3);
        assert!(page.meta.has_next);
        assert!(page.meta.has_prev);

        let err = fx
            .authors
            .find_many_paged(Filter::new(), &Pagination::new(1, 500))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn field_lookups_fold_case_by_default() {
        let fx = fixture();
        let author = fx.authors.create(&AuthorDraft::new("Octavia Butler"), None).await.unwrap();

        let opts = LookupOptions::new();
        assert!(fx.authors.find_by_field("name", " octavia butler", &opts).await.unwrap().is_some());
        assert!(!fx
            .authors
            .exists_by_field("name", "octavia butler", &LookupOptions::new().case_sensitive())
            .await
            .unwrap());
        assert!(!fx
            .authors
            .exists_by_field("name", "Octavia Butler", &LookupOptions::new().excluding(author.id))
            .await
            .unwrap());

        let by_fields = fx
            .authors
            .find_by_fields(&[("name", JsonValue::from("OCTAVIA BUTLER"))], &opts)
            .await
            .unwrap();
        assert_eq!(by_fields.map(|a| a.id), Some(author.id));
    }

    #[tokio::test]
    async fn unique_constraints_respect_exclusion() {
        let fx = fixture();
        let author = fx.authors.create(&AuthorDraft::new("Iain Banks"), None).await.unwrap();
        let constraints = [UniqueConstraint::single("name", "An author with this name already exists")
            .transform("name", Transform::TrimLowercase)];

        let candidate = AuthorDraft::new(" iain banks");
        let err = fx
            .authors
            .validate_unique_constraints(&candidate, None, &constraints)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "An author with this name already exists");

        fx.authors
            .validate_unique_constraints(&candidate, Some(author.id), &constraints)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sink_failures_do_not_fail_the_operation() {
        let backend = InMemoryBackend::arc();
        let writer = AuditWriter::new(Arc::new(MemoryAuditSink::failing()), AuditEnvironment::current("test"));
        let authors: EntityStore<Author> = EntityStore::with_audit(backend, writer);

        let author = authors.create(&AuthorDraft::new("Gibson"), audited()).await.unwrap();
        assert_eq!(author.name, "Gibson");
    }
}
