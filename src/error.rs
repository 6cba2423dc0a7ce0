//! Core error taxonomy shared by every component

use thiserror::Error;

/// Error kinds surfaced by the pipeline/scheduler/storage core.
///
/// Each variant corresponds to one of the kinds from the error handling
/// design: callers branch on the variant, not the message, to decide
/// whether a failure is retryable.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("plugin '{plugin}' failed: {message}")]
    PluginFailure { plugin: String, message: String },

    #[error("step '{step}' timed out after {timeout_secs}s")]
    Timeout { step: String, timeout_secs: u64 },

    #[error("execution cancelled: {0}")]
    Cancelled(String),

    #[error("transient failure, retry may succeed: {0}")]
    Transient(String),

    #[error("fatal invariant violation: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound { kind, id: id.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    /// Whether the caller may reasonably retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => CoreError::Transient(e.to_string()),
            sqlx::Error::RowNotFound => CoreError::not_found("row", "unknown"),
            other => CoreError::Fatal(other.to_string()),
        }
    }
}
