//! Postgres-backed bulk writer: entity merge, stack reconciliation,
//! parameter-budget arithmetic, and schema migrations (§4.8, §6).

pub mod budget;
pub mod cache;
pub mod conflict;
pub mod error;
pub mod pool;
pub mod schema;
pub mod writer;

pub use error::{StoreError, StoreResult};
pub use pool::StorePool;
pub use writer::{BatchReport, BulkWriter, PendingInstance};
