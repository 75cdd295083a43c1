//! Extraction error taxonomy (§7: instance-level errors are logged and
//! skipped, never fatal; scan/config errors are fatal).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("scan root is not a directory: {0}")]
    RootNotADirectory(String),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Store(#[from] dcmforge_store::StoreError),

    #[error("job cancelled")]
    Cancelled(#[from] dcmforge_job::JobCancelled),

    #[error("subject map error: {0}")]
    SubjectMap(String),
}

pub type ExtractResult<T> = Result<T, ExtractError>;

/// One instance's parse failure. Never fatal to the run (§7); collected for
/// the job's metrics and skipped.
#[derive(Debug, Clone)]
pub struct InstanceError {
    pub path: String,
    pub reason: String,
}
