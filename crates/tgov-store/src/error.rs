//! Store error taxonomy and transient-failure classification.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The ingestion advisory lock is held by another run. Returned
    /// immediately, never waited on.
    #[error("another run already holds the ingestion lock")]
    AlreadyRunning,

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("serializing record for lineage")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the orchestrator's retry policy applies. Validation-class
    /// and contention errors are never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::AlreadyRunning | StoreError::Serialize(_) => false,
            StoreError::Sqlx(err) => sqlx_error_is_transient(err),
        }
    }
}

/// Transient Postgres failures: connection-level I/O, pool exhaustion,
/// deadlocks, serialization failures, and the 08xxx connection-exception
/// class. Statement timeouts (57014) are deliberately not retried; a
/// statement that ran 60 s once will run 60 s again.
pub fn sqlx_error_is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("40001") | Some("40P01") | Some("55P03") => true,
            Some(code) => code.starts_with("08"),
            None => false,
        },
        _ => false,
    }
}
