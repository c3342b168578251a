//! In-memory backend for tests/dev.
//!
//! Each session stages its writes in an overlay; reads see committed state
//! plus the session's own staged writes (read committed). Commit applies the
//! overlay atomically under the write lock.
//!
//! Faults can be injected to exercise failure paths: each injected fault
//! fails the next matching operation once.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use catalog_core::RecordId;

use super::query::{Filter, Query};
use super::{Backend, BackendError, Document, Session};

type Table = BTreeMap<String, Document>;

/// Operation an injected fault targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Fault {
    Begin,
    Insert,
    Update,
    Find,
    Count,
    Commit,
    Rollback,
    Release,
}

/// Connection accounting, for asserting release/commit behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub acquired: u64,
    pub released: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

impl ConnectionStats {
    /// Connections acquired but not yet handed back.
    pub fn outstanding(&self) -> u64 {
        self.acquired - self.released
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<HashMap<String, Table>>,
    stats: Mutex<ConnectionStats>,
    faults: Mutex<Vec<Fault>>,
}

impl Shared {
    fn trip(&self, op: Fault) -> Result<(), BackendError> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| BackendError::Connection("lock poisoned".to_string()))?;
        if let Some(pos) = faults.iter().position(|f| *f == op) {
            faults.remove(pos);
            return Err(BackendError::Injected(op));
        }
        Ok(())
    }

    fn record(&self, f: impl FnOnce(&mut ConnectionStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

/// In-memory document backend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    shared: Arc<Shared>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Fail the next `op` once.
    pub fn inject(&self, op: Fault) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.push(op);
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        self.shared
            .stats
            .lock()
            .map(|s| *s)
            .unwrap_or_default()
    }

    /// Committed documents of one entity type, deleted ones included.
    pub fn committed(&self, entity_type: &str) -> Vec<Document> {
        self.shared
            .tables
            .read()
            .map(|tables| {
                tables
                    .get(entity_type)
                    .map(|t| t.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn Session>, BackendError> {
        self.shared.trip(Fault::Begin)?;
        self.shared.record(|s| s.acquired += 1);
        Ok(Box::new(InMemorySession {
            shared: self.shared.clone(),
            staged: HashMap::new(),
            finished: false,
        }))
    }
}

struct InMemorySession {
    shared: Arc<Shared>,
    staged: HashMap<String, Table>,
    finished: bool,
}

impl InMemorySession {
    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.finished {
            return Err(BackendError::SessionClosed);
        }
        Ok(())
    }

    /// Committed rows overlaid with this session's staged rows.
    fn visible(&self, entity_type: &str) -> Result<Table, BackendError> {
        let tables = self
            .shared
            .tables
            .read()
            .map_err(|_| BackendError::Connection("lock poisoned".to_string()))?;

        let mut rows = tables.get(entity_type).cloned().unwrap_or_default();
        if let Some(staged) = self.staged.get(entity_type) {
            for (id, doc) in staged {
                rows.insert(id.clone(), doc.clone());
            }
        }
        Ok(rows)
    }

    fn embed_relations(&self, query: &Query, docs: &mut [Document]) -> Result<(), BackendError> {
        for relation in query.filter.relations() {
            let targets = self.visible(&relation.entity_type)?;
            for doc in docs.iter_mut() {
                let related = match doc.get(&relation.field) {
                    Some(JsonValue::String(id)) => targets
                        .get(id)
                        .map(|d| JsonValue::Object(d.clone()))
                        .unwrap_or(JsonValue::Null),
                    _ => JsonValue::Null,
                };
                doc.insert(relation.embed_as.clone(), related);
            }
        }
        Ok(())
    }
}

fn document_id(doc: &Document) -> Result<String, BackendError> {
    match doc.get("id") {
        Some(JsonValue::String(id)) => Ok(id.clone()),
        _ => Err(BackendError::Malformed("document has no string `id`".to_string())),
    }
}

#[async_trait]
impl Session for InMemorySession {
    async fn insert(&mut self, entity_type: &str, document: Document) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.shared.trip(Fault::Insert)?;

        let id = document_id(&document)?;
        if self.visible(entity_type)?.contains_key(&id) {
            return Err(BackendError::Query(format!("duplicate id {id} in {entity_type}")));
        }
        self.staged
            .entry(entity_type.to_string())
            .or_default()
            .insert(id, document);
        Ok(())
    }

    async fn update(
        &mut self,
        entity_type: &str,
        id: RecordId,
        patch: Document,
    ) -> Result<bool, BackendError> {
        self.ensure_open()?;
        self.shared.trip(Fault::Update)?;

        let key = id.to_string();
        let Some(mut current) = self.visible(entity_type)?.remove(&key) else {
            return Ok(false);
        };
        for (field, value) in patch {
            current.insert(field, value);
        }
        self.staged
            .entry(entity_type.to_string())
            .or_default()
            .insert(key, current);
        Ok(true)
    }

    async fn find(&mut self, entity_type: &str, query: &Query) -> Result<Vec<Document>, BackendError> {
        self.ensure_open()?;
        self.shared.trip(Fault::Find)?;

        let mut docs: Vec<Document> = self
            .visible(entity_type)?
            .into_values()
            .filter(|doc| query.filter.matches(doc))
            .collect();
        query.order(&mut docs);

        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let mut docs: Vec<Document> = match query.limit {
            Some(limit) => docs
                .into_iter()
                .skip(offset)
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .collect(),
            None => docs.into_iter().skip(offset).collect(),
        };

        self.embed_relations(query, &mut docs)?;
        Ok(docs)
    }

    async fn count(&mut self, entity_type: &str, filter: &Filter) -> Result<u64, BackendError> {
        self.ensure_open()?;
        self.shared.trip(Fault::Count)?;

        let n = self
            .visible(entity_type)?
            .values()
            .filter(|doc| filter.matches(doc))
            .count();
        Ok(n as u64)
    }

    async fn commit(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.finished = true;
        self.shared.trip(Fault::Commit)?;

        let mut tables = self
            .shared
            .tables
            .write()
            .map_err(|_| BackendError::Connection("lock poisoned".to_string()))?;
        for (entity_type, rows) in self.staged.drain() {
            tables.entry(entity_type).or_default().extend(rows);
        }
        drop(tables);

        self.shared.record(|s| s.commits += 1);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.finished = true;
        self.staged.clear();
        self.shared.trip(Fault::Rollback)?;
        self.shared.record(|s| s.rollbacks += 1);
        Ok(())
    }

    async fn release(self: Box<Self>) -> Result<(), BackendError> {
        // The connection counts as returned even when release reports a fault.
        self.shared.record(|s| s.released += 1);
        self.shared.trip(Fault::Release)
    }
}
