//! Error taxonomy for the storage layer (§7: DB errors roll the current
//! batch transaction back; the step fails; no partial batch is visible).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("pool build error: {0}")]
    PoolBuild(#[from] deadpool_postgres::BuildError),

    #[error("migration {version} failed: {source}")]
    Migration {
        version: i32,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("parameter budget exceeded: {requested} params requested, {budget} available")]
    ParameterBudget { requested: usize, budget: usize },

    #[error("job cancelled")]
    Cancelled(#[from] dcmforge_job::JobCancelled),

    #[error("no stacks exist for the requested series; extraction must run first")]
    NoStacksForSeries,
}

pub type StoreResult<T> = Result<T, StoreError>;
