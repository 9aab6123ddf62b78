use metatrack_storage::StorageError;
use thiserror::Error;

/// Errors raised inside the reconciliation engine.
///
/// None of these ever reach a write-path caller: `Enqueuer::insert` is
/// infallible and cycle failures end at the log.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job {job} failed: {message}")]
    Job { job: &'static str, message: String },

    #[error("Worker pool is shut down")]
    Shutdown,
}

impl ReconcileError {
    pub fn job(job: &'static str, message: impl Into<String>) -> Self {
        Self::Job {
            job,
            message: message.into(),
        }
    }

    /// Returns `true` if the next resync pass is likely to succeed where this failed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Job { .. } => false,
            Self::Shutdown => false,
        }
    }
}
