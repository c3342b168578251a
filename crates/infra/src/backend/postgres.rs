//! Postgres-backed document storage.
//!
//! All entity types share one table, `entity_records`, keyed by
//! `(entity_type, id)`. The document lives in a JSONB column; `created_at`
//! and `deleted_at` are mirrored into real columns for ordering and the
//! soft-delete predicate.
//!
//! ## Error Mapping
//!
//! | SQLx Error | BackendError |
//! |------------|--------------|
//! | Database (any code) | `Query` |
//! | PoolTimedOut / PoolClosed / Io / Tls | `Connection` |
//! | Decode / ColumnDecode | `Malformed` |
//! | Other | `Query` |

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use catalog_core::RecordId;

use super::query::{Condition, Filter, Query, DELETED_AT};
use super::{Backend, BackendError, Document, Session};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS entity_records (
        entity_type TEXT NOT NULL,
        id UUID NOT NULL,
        data JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        deleted_at TIMESTAMPTZ NULL,
        PRIMARY KEY (entity_type, id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS entity_records_live_idx
        ON entity_records (entity_type, created_at)
        WHERE deleted_at IS NULL
    "#,
];

/// Connection-pooled Postgres backend.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the records table if it does not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), BackendError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn Session>, BackendError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PgSession {
            pool: self.pool.clone(),
            tx: Some(tx),
        }))
    }
}

struct PgSession {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSession {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, BackendError> {
        self.tx.as_mut().ok_or(BackendError::SessionClosed)
    }

    async fn embed_relations(
        &mut self,
        query: &Query,
        docs: &mut [Document],
    ) -> Result<(), BackendError> {
        for relation in query.filter.relations() {
            let ids: Vec<Uuid> = docs
                .iter()
                .filter_map(|d| d.get(&relation.field)?.as_str()?.parse().ok())
                .collect();

            let mut related: HashMap<String, JsonValue> = HashMap::new();
            if !ids.is_empty() {
                let tx = self.tx()?;
                let rows = sqlx::query(
                    "SELECT id::text AS id, data FROM entity_records WHERE entity_type = $1 AND id = ANY($2)",
                )
                .bind(relation.entity_type.clone())
                .bind(ids)
                .fetch_all(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("find", e))?;

                for row in rows {
                    let id: String = row.try_get("id").map_err(|e| map_sqlx_error("find", e))?;
                    let data: JsonValue = row.try_get("data").map_err(|e| map_sqlx_error("find", e))?;
                    related.insert(id, data);
                }
            }

            for doc in docs.iter_mut() {
                let value = doc
                    .get(&relation.field)
                    .and_then(JsonValue::as_str)
                    .and_then(|id| related.get(id).cloned())
                    .unwrap_or(JsonValue::Null);
                doc.insert(relation.embed_as.clone(), value);
            }
        }
        Ok(())
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    for condition in filter.conditions() {
        match condition {
            Condition::Eq { field, value } => {
                qb.push(" AND data -> ");
                qb.push_bind(field.clone());
                qb.push(" = ");
                qb.push_bind(value.clone());
            }
            Condition::EqNormalized { field, value } => {
                qb.push(" AND lower(btrim(data ->> ");
                qb.push_bind(field.clone());
                qb.push(")) = lower(btrim(");
                qb.push_bind(value.clone());
                qb.push("))");
            }
            Condition::Ne { field, value } => {
                qb.push(" AND (data -> ");
                qb.push_bind(field.clone());
                qb.push(") IS DISTINCT FROM ");
                qb.push_bind(value.clone());
            }
        }
    }
    if !filter.includes_deleted() {
        qb.push(" AND deleted_at IS NULL");
    }
}

fn timestamp_field(doc: &Document, field: &str) -> Result<Option<DateTime<Utc>>, BackendError> {
    match doc.get(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(raw)) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| BackendError::Malformed(format!("{field}: {e}"))),
        Some(other) => Err(BackendError::Malformed(format!("{field}: expected timestamp, got {other}"))),
    }
}

fn document_id(doc: &Document) -> Result<Uuid, BackendError> {
    doc.get("id")
        .and_then(JsonValue::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| BackendError::Malformed("document has no uuid `id`".to_string()))
}

#[async_trait]
impl Session for PgSession {
    async fn insert(&mut self, entity_type: &str, document: Document) -> Result<(), BackendError> {
        let id = document_id(&document)?;
        let created_at = timestamp_field(&document, "created_at")?.unwrap_or_else(Utc::now);
        let deleted_at = timestamp_field(&document, DELETED_AT)?;

        let tx = self.tx()?;
        sqlx::query(
            r#"
            INSERT INTO entity_records (entity_type, id, data, created_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entity_type)
        .bind(id)
        .bind(JsonValue::Object(document))
        .bind(created_at)
        .bind(deleted_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;
        Ok(())
    }

    async fn update(
        &mut self,
        entity_type: &str,
        id: RecordId,
        patch: Document,
    ) -> Result<bool, BackendError> {
        let touches_deleted = patch.contains_key(DELETED_AT);
        let deleted_at = timestamp_field(&patch, DELETED_AT)?;

        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            UPDATE entity_records
            SET data = data || $3,
                deleted_at = CASE WHEN $4 THEN $5 ELSE deleted_at END
            WHERE entity_type = $1 AND id = $2
            "#,
        )
        .bind(entity_type)
        .bind(id.as_uuid())
        .bind(JsonValue::Object(patch))
        .bind(touches_deleted)
        .bind(deleted_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(&mut self, entity_type: &str, query: &Query) -> Result<Vec<Document>, BackendError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT data FROM entity_records WHERE entity_type = ");
        qb.push_bind(entity_type.to_string());
        push_filter(&mut qb, &query.filter);

        if let Some(sort) = &query.sort {
            if sort.field == "created_at" {
                qb.push(" ORDER BY created_at ");
            } else {
                qb.push(" ORDER BY data -> ");
                qb.push_bind(sort.field.clone());
                qb.push(" ");
            }
            qb.push(sort.order.as_sql());
            qb.push(", id ASC");
        }
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ");
            qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        if query.offset > 0 {
            qb.push(" OFFSET ");
            qb.push_bind(i64::try_from(query.offset).unwrap_or(i64::MAX));
        }

        let tx = self.tx()?;
        let rows = qb
            .build()
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("find", e))?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            match row.try_get::<JsonValue, _>("data").map_err(|e| map_sqlx_error("find", e))? {
                JsonValue::Object(doc) => docs.push(doc),
                other => {
                    return Err(BackendError::Malformed(format!(
                        "{entity_type} record is not an object: {other}"
                    )));
                }
            }
        }

        self.embed_relations(query, &mut docs).await?;
        Ok(docs)
    }

    async fn count(&mut self, entity_type: &str, filter: &Filter) -> Result<u64, BackendError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS n FROM entity_records WHERE entity_type = ");
        qb.push_bind(entity_type.to_string());
        push_filter(&mut qb, filter);

        let tx = self.tx()?;
        let row = qb
            .build()
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("count", e))?;
        let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("count", e))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    async fn commit(&mut self) -> Result<(), BackendError> {
        let tx = self.tx.take().ok_or(BackendError::SessionClosed)?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(&mut self) -> Result<(), BackendError> {
        let tx = self.tx.take().ok_or(BackendError::SessionClosed)?;
        tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }

    async fn release(self: Box<Self>) -> Result<(), BackendError> {
        // Dropping an unfinished transaction rolls it back and returns the
        // connection to the pool.
        let PgSession { pool, tx } = *self;
        drop(tx);
        if pool.is_closed() {
            return Err(BackendError::Connection("pool closed before release".to_string()));
        }
        Ok(())
    }
}

/// Map SQLx errors to backend errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> BackendError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            BackendError::Query(format!("database error in {operation} ({code}): {}", db_err.message()))
        }
        sqlx::Error::PoolTimedOut => {
            BackendError::Connection(format!("timed out acquiring connection in {operation}"))
        }
        sqlx::Error::PoolClosed => BackendError::Connection(format!("connection pool closed in {operation}")),
        sqlx::Error::Io(e) => BackendError::Connection(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => BackendError::Connection(format!("tls error in {operation}: {e}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            BackendError::Malformed(format!("undecodable row in {operation}: {err}"))
        }
        _ => BackendError::Query(format!("sqlx error in {operation}: {err}")),
    }
}
