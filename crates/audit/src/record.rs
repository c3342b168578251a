//! Audit data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use catalog_core::{Entity, RecordId};

/// What was done.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Read,
    Login,
    Register,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Read => "READ",
            AuditAction::Login => "LOGIN",
            AuditAction::Register => "REGISTER",
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How it went.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    #[default]
    Success,
    Error,
    Started,
}

/// Uninhabited patch type: audit records cannot be updated.
#[derive(Debug, Clone, Copy, Serialize)]
pub enum Immutable {}

/// A persisted audit record. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: RecordId,
    pub performed_by: String,
    pub entity_id: Option<String>,
    pub action: AuditAction,
    pub details: String,
    pub entity_type: String,
    pub result: AuditOutcome,
    pub ip_address: Option<String>,
    pub environment: String,
    pub process_id: u32,
    pub execution_context: String,
    pub entity_snapshot: Option<JsonValue>,
    pub execution_time_ms: u64,
    pub error_details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for AuditRecord {
    const ENTITY_NAME: &'static str = "AuditRecord";

    type Draft = NewAuditRecord;
    type Patch = Immutable;

    fn id(&self) -> RecordId {
        self.id
    }
}

/// Audit record as handed to a sink: everything except the store-assigned
/// `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditRecord {
    pub performed_by: String,
    pub entity_id: Option<String>,
    pub action: AuditAction,
    pub details: String,
    pub entity_type: String,
    pub result: AuditOutcome,
    pub ip_address: Option<String>,
    pub environment: String,
    pub process_id: u32,
    pub execution_context: String,
    pub entity_snapshot: Option<JsonValue>,
    pub execution_time_ms: u64,
    pub error_details: Option<String>,
}

impl NewAuditRecord {
    /// Materialize the record with its identity, for sinks that assign ids
    /// themselves.
    pub fn into_record(self, id: RecordId, created_at: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            id,
            performed_by: self.performed_by,
            entity_id: self.entity_id,
            action: self.action,
            details: self.details,
            entity_type: self.entity_type,
            result: self.result,
            ip_address: self.ip_address,
            environment: self.environment,
            process_id: self.process_id,
            execution_context: self.execution_context,
            entity_snapshot: self.entity_snapshot,
            execution_time_ms: self.execution_time_ms,
            error_details: self.error_details,
            created_at,
        }
    }
}

/// Caller-side description of an auditable action.
///
/// The writer stamps environment and process id when turning this into a
/// [`NewAuditRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    performed_by: String,
    action: AuditAction,
    entity_type: String,
    entity_id: Option<String>,
    details: String,
    result: AuditOutcome,
    ip_address: Option<String>,
    execution_context: Option<String>,
    entity_snapshot: Option<JsonValue>,
    execution_time_ms: u64,
    error_details: Option<String>,
}

impl AuditEntry {
    pub fn new(
        performed_by: impl Into<String>,
        action: AuditAction,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            performed_by: performed_by.into(),
            action,
            entity_type: entity_type.into(),
            entity_id: None,
            details: String::new(),
            result: AuditOutcome::Success,
            ip_address: None,
            execution_context: None,
            entity_snapshot: None,
            execution_time_ms: 0,
            error_details: None,
        }
    }

    pub fn entity_id(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn ip_address(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.execution_context = Some(context.into());
        self
    }

    pub fn snapshot(mut self, snapshot: JsonValue) -> Self {
        self.entity_snapshot = Some(snapshot);
        self
    }

    pub fn elapsed_ms(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }

    pub fn started(mut self) -> Self {
        self.result = AuditOutcome::Started;
        self.error_details = None;
        self
    }

    /// Mark the entry as a failure carrying `message`.
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.result = AuditOutcome::Error;
        self.error_details = Some(message.into());
        self
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }

    pub fn outcome(&self) -> AuditOutcome {
        self.result
    }

    /// Finalize into a record. `error_details` only survives on failures.
    pub fn into_new_record(self, environment: &str, process_id: u32) -> NewAuditRecord {
        let error_details = match self.result {
            AuditOutcome::Error => self.error_details,
            AuditOutcome::Success | AuditOutcome::Started => None,
        };

        NewAuditRecord {
            performed_by: self.performed_by,
            entity_id: self.entity_id,
            action: self.action,
            details: self.details,
            execution_context: self
                .execution_context
                .unwrap_or_else(|| format!("{}Repository", self.entity_type)),
            entity_type: self.entity_type,
            result: self.result,
            ip_address: self.ip_address,
            environment: environment.to_string(),
            process_id,
            entity_snapshot: self.entity_snapshot,
            execution_time_ms: self.execution_time_ms,
            error_details,
        }
    }
}
