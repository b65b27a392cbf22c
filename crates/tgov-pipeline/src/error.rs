//! Pipeline-level error taxonomy.

use std::path::PathBuf;

use tgov_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The advisory lock is held; the scheduler logs and skips.
    #[error("another run is already in progress")]
    AlreadyRunning,

    #[error("run cancelled")]
    Cancelled,

    #[error("data directory not found: {}", .0.display())]
    MissingDataDir(PathBuf),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyRunning => PipelineError::AlreadyRunning,
            other => PipelineError::Store(other),
        }
    }
}

impl PipelineError {
    /// Only transient store failures qualify for the retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Store(err) if err.is_transient())
    }
}
