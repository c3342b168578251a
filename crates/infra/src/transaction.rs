//! Explicit units of work.
//!
//! [`TransactionCoordinator::with_transaction`] owns the whole lifecycle of
//! one session: begin, optional lifecycle audit, exactly one commit or
//! rollback, and exactly one release, on every exit path.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, instrument, warn};

use catalog_audit::{AuditAction, AuditEntry, AuditWriter};

use crate::backend::{Backend, BackendError, Session};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
    Released,
}

pub(crate) struct TxSlot {
    session: Option<Box<dyn Session>>,
    state: TxState,
}

impl TxSlot {
    /// The open session, or `SessionClosed` once the transaction finished.
    pub(crate) fn session(&mut self) -> Result<&mut (dyn Session + 'static), BackendError> {
        if self.state != TxState::Active {
            return Err(BackendError::SessionClosed);
        }
        self.session.as_deref_mut().ok_or(BackendError::SessionClosed)
    }
}

/// Handle to one open transaction.
///
/// Cheap to clone; every clone drives the same session. Stores bound to it
/// through `EntityStore::in_transaction` must not outlive the
/// `with_transaction` call that produced it: afterwards every operation fails
/// with a closed-session error.
#[derive(Clone)]
pub struct Transaction {
    slot: Arc<Mutex<TxSlot>>,
    operation: Arc<str>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    fn new(session: Box<dyn Session>, operation: &str) -> Self {
        Self {
            slot: Arc::new(Mutex::new(TxSlot {
                session: Some(session),
                state: TxState::Active,
            })),
            operation: Arc::from(operation),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub async fn is_active(&self) -> bool {
        self.slot.lock().await.state == TxState::Active
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, TxSlot> {
        self.slot.lock().await
    }

    async fn commit(&self) -> Result<(), BackendError> {
        let mut slot = self.slot.lock().await;
        let session = slot.session()?;
        let result = session.commit().await;
        slot.state = TxState::Committed;
        result
    }

    async fn rollback(&self) -> Result<(), BackendError> {
        let mut slot = self.slot.lock().await;
        let session = slot.session()?;
        let result = session.rollback().await;
        slot.state = TxState::RolledBack;
        result
    }

    async fn release(&self) -> Result<(), BackendError> {
        let mut slot = self.slot.lock().await;
        slot.state = TxState::Released;
        match slot.session.take() {
            Some(session) => session.release().await,
            None => Err(BackendError::SessionClosed),
        }
    }
}

/// Who to attribute lifecycle audit records to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionAudit {
    pub performed_by: String,
    pub entity_name: String,
    pub action: AuditAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    pub operation_name: String,
    pub audit: Option<TransactionAudit>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            operation_name: "transaction".to_string(),
            audit: None,
        }
    }
}

impl TransactionOptions {
    pub fn named(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            audit: None,
        }
    }

    /// Emit STARTED / SUCCESS / ERROR records attributed to `performed_by`.
    pub fn audited(mut self, performed_by: impl Into<String>, entity_name: impl Into<String>) -> Self {
        self.audit = Some(TransactionAudit {
            performed_by: performed_by.into(),
            entity_name: entity_name.into(),
            action: AuditAction::Update,
        });
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        if let Some(audit) = &mut self.audit {
            audit.action = action;
        }
        self
    }
}

enum Phase<'a> {
    Started,
    Committed,
    Failed(&'a str),
}

#[derive(Clone)]
pub struct TransactionCoordinator {
    backend: Arc<dyn Backend>,
    audit: Option<AuditWriter>,
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("backend", &self.backend.name())
            .field("audited", &self.audit.is_some())
            .finish()
    }
}

impl TransactionCoordinator {
    pub fn new(backend: Arc<dyn Backend>, audit: AuditWriter) -> Self {
        Self {
            backend,
            audit: Some(audit),
        }
    }

    pub fn without_audit(backend: Arc<dyn Backend>) -> Self {
        Self { backend, audit: None }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Run `op` inside one transaction.
    ///
    /// `Ok` commits, `Err` rolls back. Recognized errors are returned
    /// unchanged; anything else is wrapped as
    /// `TransactionFailure { operation }`. A failed rollback is logged and the
    /// original error is kept. Release always happens exactly once and its
    /// failure is only logged.
    #[instrument(skip_all, fields(operation = %options.operation_name), err)]
    pub async fn with_transaction<R, F, Fut>(&self, options: TransactionOptions, op: F) -> StoreResult<R>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = StoreResult<R>>,
    {
        let started = Instant::now();
        let operation = options.operation_name.as_str();

        let session = self.backend.begin().await.map_err(|e| {
            error!(operation, error = %e, "failed to begin transaction");
            StoreError::transaction_failure(operation, e)
        })?;
        let tx = Transaction::new(session, operation);
        debug!(operation, "transaction started");

        self.lifecycle(&options, Phase::Started, started).await;

        let result = match op(tx.clone()).await {
            Ok(value) => match tx.commit().await {
                Ok(()) => {
                    debug!(operation, "transaction committed");
                    self.lifecycle(&options, Phase::Committed, started).await;
                    Ok(value)
                }
                Err(e) => {
                    error!(operation, error = %e, "commit failed");
                    let err = StoreError::transaction_failure(operation, e);
                    self.lifecycle(&options, Phase::Failed(&err.to_string()), started).await;
                    Err(err)
                }
            },
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(
                        operation,
                        error = %rollback_err,
                        original = %err,
                        "rollback failed; keeping original error"
                    );
                } else {
                    debug!(operation, error = %err, "transaction rolled back");
                }
                self.lifecycle(&options, Phase::Failed(&err.to_string()), started).await;

                match err {
                    StoreError::Unexpected(cause) => Err(StoreError::transaction_failure(operation, cause)),
                    recognized => Err(recognized),
                }
            }
        };

        if let Err(e) = tx.release().await {
            warn!(operation, error = %e, "failed to release connection");
        }

        result
    }

    async fn lifecycle(&self, options: &TransactionOptions, phase: Phase<'_>, started: Instant) {
        let (Some(writer), Some(audit)) = (&self.audit, &options.audit) else {
            return;
        };

        let operation = &options.operation_name;
        let entry = AuditEntry::new(&audit.performed_by, audit.action, &audit.entity_name)
            .context("TransactionCoordinator")
            .elapsed_ms(elapsed_ms(started));
        let entry = match phase {
            Phase::Started => entry.details(format!("{operation} started")).started(),
            Phase::Committed => entry.details(format!("{operation} committed")),
            Phase::Failed(message) => entry
                .details(format!("{operation} rolled back"))
                .failed(message),
        };

        writer.notify(entry).await;
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
