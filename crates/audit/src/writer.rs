//! Best-effort audit writer.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::record::{AuditAction, AuditEntry};
use crate::sink::AuditSink;

/// Process-level fields stamped on every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEnvironment {
    pub environment: String,
    pub process_id: u32,
}

impl AuditEnvironment {
    /// Environment name plus the current process id.
    pub fn current(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            process_id: std::process::id(),
        }
    }
}

/// Result of a best-effort notification.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AuditDelivery {
    Recorded,
    /// The sink failed; the failure went to the diagnostic log only.
    Dropped,
}

impl AuditDelivery {
    pub fn is_recorded(self) -> bool {
        matches!(self, AuditDelivery::Recorded)
    }
}

/// Appends audit records and never propagates a failure to the caller.
///
/// Every entry point funnels through [`AuditWriter::notify`].
#[derive(Clone)]
pub struct AuditWriter {
    sink: Arc<dyn AuditSink>,
    env: AuditEnvironment,
}

impl core::fmt::Debug for AuditWriter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuditWriter")
            .field("sink", &self.sink.name())
            .field("env", &self.env)
            .finish()
    }
}

impl AuditWriter {
    pub fn new(sink: Arc<dyn AuditSink>, env: AuditEnvironment) -> Self {
        Self { sink, env }
    }

    pub fn environment(&self) -> &AuditEnvironment {
        &self.env
    }

    /// Write one entry. Sink failures are logged at `warn` and reported as
    /// [`AuditDelivery::Dropped`].
    pub async fn notify(&self, entry: AuditEntry) -> AuditDelivery {
        let action = entry.action();
        let record = entry.into_new_record(&self.env.environment, self.env.process_id);
        let entity_type = record.entity_type.clone();

        match self.sink.write(record).await {
            Ok(()) => {
                debug!(sink = self.sink.name(), %action, %entity_type, "audit record written");
                AuditDelivery::Recorded
            }
            Err(err) => {
                warn!(
                    sink = self.sink.name(),
                    %action,
                    %entity_type,
                    error = %err,
                    "failed to write audit record; continuing"
                );
                AuditDelivery::Dropped
            }
        }
    }

    /// Record a fully described entry (snapshot, timing, context).
    pub async fn log_enhanced(&self, entry: AuditEntry) -> AuditDelivery {
        self.notify(entry).await
    }

    pub async fn log_user_action(
        &self,
        performed_by: &str,
        entity_id: &str,
        action: AuditAction,
        details: &str,
        entity_type: &str,
    ) -> AuditDelivery {
        let entry = AuditEntry::new(performed_by, action, entity_type)
            .entity_id(entity_id)
            .details(details);
        self.notify(entry).await
    }

    pub async fn log_error(
        &self,
        performed_by: &str,
        action: AuditAction,
        entity_type: &str,
        message: &str,
        ip_address: Option<String>,
        context: Option<&str>,
    ) -> AuditDelivery {
        let mut entry = AuditEntry::new(performed_by, action, entity_type)
            .details(format!("{action} on {entity_type} failed"))
            .ip_address(ip_address)
            .failed(message);
        if let Some(context) = context {
            entry = entry.context(context);
        }
        self.notify(entry).await
    }
}
