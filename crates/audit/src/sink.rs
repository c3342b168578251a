//! Audit sinks: where records end up.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use catalog_core::RecordId;

use crate::error::{AuditError, AuditResult};
use crate::record::{AuditRecord, NewAuditRecord};

/// Destination for audit records.
///
/// Sinks only ever append. Errors are reported to the writer, which logs and
/// drops them.
#[async_trait]
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &str;

    async fn write(&self, record: NewAuditRecord) -> AuditResult<()>;
}

#[async_trait]
impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn write(&self, record: NewAuditRecord) -> AuditResult<()> {
        (**self).write(record).await
    }
}

/// Emits every record as a structured `tracing` event under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn write(&self, record: NewAuditRecord) -> AuditResult<()> {
        tracing::info!(
            target: "audit",
            performed_by = %record.performed_by,
            action = %record.action,
            entity_type = %record.entity_type,
            entity_id = record.entity_id.as_deref().unwrap_or("-"),
            result = ?record.result,
            execution_context = %record.execution_context,
            execution_time_ms = record.execution_time_ms,
            error_details = record.error_details.as_deref().unwrap_or(""),
            "{}",
            record.details
        );
        Ok(())
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    reject: bool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every write.
    pub fn failing() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, record: NewAuditRecord) -> AuditResult<()> {
        if self.reject {
            return Err(AuditError::sink(self.name(), "sink configured to reject writes"));
        }
        let mut records = self
            .records
            .lock()
            .map_err(|_| AuditError::sink("memory", "lock poisoned"))?;
        records.push(record.into_record(RecordId::new(), Utc::now()));
        Ok(())
    }
}

/// Writes each record to every inner sink.
///
/// All sinks are attempted; the first failure is reported after the fan-out.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AuditSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn write(&self, record: NewAuditRecord) -> AuditResult<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(err) = sink.write(record.clone()).await {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AuditAction, AuditEntry};

    fn sample() -> NewAuditRecord {
        AuditEntry::new("u1", AuditAction::Create, "Author").into_new_record("test", 1)
    }

    #[tokio::test]
    async fn memory_sink_assigns_identity() {
        let sink = MemoryAuditSink::new();
        sink.write(sample()).await.unwrap();
        sink.write(sample()).await.unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].id, records[1].id);
    }

    #[tokio::test]
    async fn fanout_attempts_every_sink() {
        let healthy = Arc::new(MemoryAuditSink::new());
        let fanout = FanoutSink::new(vec![
            Arc::new(MemoryAuditSink::failing()),
            healthy.clone(),
        ]);

        let result = fanout.write(sample()).await;

        assert!(matches!(result, Err(AuditError::Sink { .. })));
        assert_eq!(healthy.records().len(), 1);
    }
}
