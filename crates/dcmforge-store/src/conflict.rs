//! `IngestConflict` persistence (§3 "Conflict policy").

use dcmforge_core::entities::IngestConflict;
use tokio_postgres::GenericClient;

use crate::error::StoreResult;

/// Bulk-inserts conflict rows within an already-open transaction. Conflicts
/// are dedup'd by the schema's unique index, so a re-parenting observed
/// twice in one batch is logged once.
pub async fn record<C: GenericClient>(
    client: &C,
    conflicts: &[IngestConflict],
) -> StoreResult<()> {
    for conflict in conflicts {
        client
            .execute(
                "INSERT INTO ingest_conflict (cohort_id, scope, uid, detail) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (cohort_id, scope, uid, detail) DO NOTHING",
                &[
                    &conflict.cohort_id,
                    &conflict.scope,
                    &conflict.uid,
                    &conflict.detail,
                ],
            )
            .await?;
    }
    Ok(())
}
