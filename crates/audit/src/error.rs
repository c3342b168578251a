use thiserror::Error;

pub type AuditResult<T> = Result<T, AuditError>;

/// Failure inside an audit sink.
///
/// Never crosses the [`crate::AuditWriter`] boundary.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("sink '{sink}' rejected record: {message}")]
    Sink { sink: String, message: String },

    #[error("failed to serialize audit record: {0}")]
    Serialize(String),
}

impl AuditError {
    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.into(),
        }
    }
}
