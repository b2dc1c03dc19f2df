//! Error taxonomy the core raises or observes.
//!
//! Use cases translate low-level I/O errors into these kinds; the task
//! runtime decides whether to retry from the kind, never from the
//! underlying exception/error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Empty description, malformed ids. Returned synchronously, not retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Incident id missing on severity recompute, or similar. Retried once
    /// then failed by the task runtime.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate membership and similar unique-constraint violations.
    /// Treated as success by the clustering use case (idempotent retry).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Vector-store / LLM / relational I/O errors with a retryable code.
    /// Retried with backoff by the task runtime.
    #[error("transient external error: {0}")]
    TransientExternal(String),

    /// Authentication / quota / schema errors. Not retried, surfaced to the
    /// ops log.
    #[error("permanent external error: {0}")]
    PermanentExternal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Whether the task runtime should retry a job that failed with this
    /// error kind. Mirrors the taxonomy in the error handling design: only
    /// `NotFound` (once) and `TransientExternal` are retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound(_) | EngineError::TransientExternal(_)
        )
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => EngineError::NotFound(err.to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                EngineError::Conflict(err.to_string())
            }
            _ => EngineError::TransientExternal(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            EngineError::TransientExternal(err.to_string())
        } else if err
            .status()
            .map(|s| s.is_client_error())
            .unwrap_or(false)
        {
            EngineError::PermanentExternal(err.to_string())
        } else {
            EngineError::TransientExternal(err.to_string())
        }
    }
}
