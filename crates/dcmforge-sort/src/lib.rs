//! The sorting pipeline: four sequential steps over a cohort's MR/CT/PET
//! series — Checkup, Fingerprint Materialization, Classification, and
//! Completion (§4.9-§4.12).
//!
//! Each step is a free async function taking a [`dcmforge_store::StorePool`]
//! and a [`dcmforge_job::JobControl`], returning a [`handover::StepOutcome`]
//! whose payload feeds the next step. The pipeline is single-threaded and
//! cooperative: a step runs to completion (checkpointing at the suspension
//! points named in its own module) before the next one starts.

pub mod error;
pub mod handover;
pub mod step1_checkup;
pub mod step2_fingerprint;
pub mod step3_classification;
pub mod step4_completion;

pub use error::{SortError, SortResult};
pub use handover::{
    Step1Handover, Step1Metrics, Step2Handover, Step2Metrics, Step3Handover, Step3Metrics, Step4Handover,
    Step4Metrics, StepOutcome,
};
pub use step1_checkup::Step1Config;
pub use step2_fingerprint::Step2Config;

use dcmforge_job::JobControl;
use dcmforge_store::StorePool;
use uuid::Uuid;

/// Runs all four steps back to back against one cohort, short-circuiting on
/// the first hard error. Callers that need per-step control (e.g. pausing
/// between Checkup and Fingerprint Materialization for operator review)
/// should call the step functions directly instead.
pub async fn run_full_pipeline(
    pool: &StorePool,
    control: &JobControl,
    step1_config: Step1Config,
) -> SortResult<Step4Handover> {
    let step1 = step1_checkup::run(pool, control, step1_config).await?;
    if step1.payload.series_ids.is_empty() {
        return Ok(Step4Handover { series_stack_ids: Vec::new() });
    }

    let cohort_id = first_cohort_id(pool, &step1.payload.series_ids).await?;
    let step2 = step2_fingerprint::run(
        pool,
        control,
        step2_fingerprint::Step2Config { cohort_id },
        &step1.payload.series_ids,
    )
    .await?;

    let step3 = step3_classification::run(pool, control, &step2.payload.series_stack_ids).await?;

    let step4 = step4_completion::run(pool, control, &step3.payload.series_stack_ids).await?;

    Ok(step4.payload)
}

async fn first_cohort_id(pool: &StorePool, series_ids: &[Uuid]) -> SortResult<Uuid> {
    let client = pool.pool().get().await?;
    let row = client
        .query_one(
            "SELECT sc.cohort_id FROM series s \
             JOIN study st ON st.id = s.study_id \
             JOIN subject_cohorts sc ON sc.subject_id = st.subject_id \
             WHERE s.id = $1 LIMIT 1",
            &[&series_ids[0]],
        )
        .await?;
    Ok(row.get(0))
}
