//! Sorting error taxonomy (§4.9-4.12, §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SortError {
    #[error("database error: {0}")]
    Db(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("storage error: {0}")]
    Store(#[from] dcmforge_store::StoreError),

    #[error("job cancelled")]
    Cancelled(#[from] dcmforge_job::JobCancelled),

    #[error("classification config error: {0}")]
    Config(#[from] dcmforge_core::config::ConfigError),

    /// Step 2's refusal condition (§4.10 step 1): no stacks exist for the
    /// input series. An error, not a warning — stacks must already exist.
    #[error("no stacks exist for the {0} input series; extraction must run first")]
    NoStacksForInputSeries(usize),

    /// Step 1's scope errors (§7): empty cohort, no studies, no valid dates.
    #[error("scope error: {0}")]
    EmptyScope(String),
}

pub type SortResult<T> = Result<T, SortError>;
