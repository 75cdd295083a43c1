//! Step 3 Classification (§4.11): runs the classification [`Pipeline`] over
//! every materialized fingerprint and persists the result to
//! `series_classification_cache`.
//!
//! Fingerprints are loaded in full, batched (1,000) off the async thread via
//! `spawn_blocking` since `Pipeline::classify` is a synchronous, CPU-bound
//! pure function, then bulk-upserted in larger chunks (10,000).

use std::collections::HashMap;

use dcmforge_core::config::ClassificationConfig;
use dcmforge_core::entities::{DirectoryType, Modality, SeriesClassificationCache, StackFingerprint};
use dcmforge_core::pipeline::Pipeline;
use dcmforge_job::JobControl;
use dcmforge_store::StorePool;
use tracing::error;
use uuid::Uuid;

use crate::error::SortResult;
use crate::handover::{Step3Handover, Step3Metrics, StepOutcome};

/// Fingerprints are pulled off the DB and classified in groups of this size
/// before the job control checkpoint fires (§4.11 step 2).
const CLASSIFY_BATCH_SIZE: usize = 1_000;
/// Classification results are upserted in larger chunks (§4.11 step 4).
const UPSERT_CHUNK_SIZE: usize = 10_000;

pub async fn run(
    pool: &StorePool,
    control: &JobControl,
    series_stack_ids: &[Uuid],
) -> SortResult<StepOutcome<Step3Handover>> {
    control.checkpoint().await?;
    let mut metrics = Step3Metrics::default();

    let client = pool.pool().get().await?;
    let fingerprints = load_fingerprints(&client, series_stack_ids).await?;

    let config = ClassificationConfig::embedded()?;
    let pipeline = std::sync::Arc::new(Pipeline::new(config));

    let mut results: Vec<SeriesClassificationCache> = Vec::with_capacity(fingerprints.len());
    for batch in fingerprints.chunks(CLASSIFY_BATCH_SIZE) {
        let pipeline = pipeline.clone();
        let owned_batch = batch.to_vec();
        let classified = tokio::task::spawn_blocking(move || classify_batch(&pipeline, &owned_batch))
            .await
            .unwrap_or_else(|join_err| {
                error!(%join_err, "classification batch task panicked");
                Vec::new()
            });
        for cache in &classified {
            *metrics.directory_type_histogram.entry(cache.directory_type.as_str().to_string()).or_insert(0) += 1;
            if let Some(provenance) = &cache.provenance {
                *metrics.provenance_histogram.entry(provenance.clone()).or_insert(0) += 1;
            }
            if cache.manual_review_required {
                metrics.manual_review_required += 1;
            }
        }
        results.extend(classified);
        control.checkpoint().await?;
    }
    metrics.stacks_classified = results.len();

    for chunk in results.chunks(UPSERT_CHUNK_SIZE) {
        upsert_cache(&client, chunk).await?;
        metrics.upsert_chunks += 1;
        control.checkpoint().await?;
    }

    let handover = Step3Handover {
        series_stack_ids: results.iter().map(|c| c.series_stack_id).collect(),
    };
    Ok(StepOutcome::complete(
        handover,
        format!(
            "{} stacks classified, {} flagged for manual review",
            metrics.stacks_classified, metrics.manual_review_required
        ),
        serde_json::to_value(&metrics).unwrap_or_default(),
    ))
}

/// Classifies one batch synchronously. A single fingerprint that panics the
/// pipeline (shouldn't happen — `classify` is pure and total — but guarded
/// per §4.11's "single-stack classify failures never fail the whole step")
/// degrades to a minimal manual-review row rather than losing the batch.
fn classify_batch(pipeline: &Pipeline, batch: &[StackFingerprint]) -> Vec<SeriesClassificationCache> {
    batch
        .iter()
        .map(|fp| {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| pipeline.classify(fp)));
            match outcome {
                Ok(outcome) => outcome.cache,
                Err(_) => error_cache(fp.series_stack_id),
            }
        })
        .collect()
}

fn error_cache(series_stack_id: Uuid) -> SeriesClassificationCache {
    let mut cache = SeriesClassificationCache {
        series_stack_id,
        directory_type: DirectoryType::Misc,
        ..Default::default()
    };
    cache.set_review_reasons(vec!["classification:error".to_string()]);
    cache
}

async fn load_fingerprints(
    client: &deadpool_postgres::Client,
    series_stack_ids: &[Uuid],
) -> SortResult<Vec<StackFingerprint>> {
    let rows = client
        .query(
            "SELECT series_stack_id, series_id, study_id, subject_id, cohort_id, modality, \
                    manufacturer, manufacturer_model_name, text_search_blob, contrast_search_blob, \
                    parsed_image_type, parsed_scanning_sequence, parsed_sequence_variant, \
                    parsed_scan_options, parsed_sequence_name, repetition_time, echo_time, \
                    inversion_time, flip_angle, echo_train_length, echo_numbers, b_values, \
                    receive_coil_name, kvp, exposure, tube_current, bed_index, frame_type, \
                    field_of_view, aspect_ratio, slice_count, image_orientation_patient, \
                    stack_orientation, orientation_confidence, mr_field_strength, mr_acquisition_type, \
                    contrast_bolus_agent_present \
             FROM stack_fingerprint WHERE series_stack_id = ANY($1)",
            &[&series_stack_ids],
        )
        .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let modality_raw: Option<String> = row.get(5);
        let iop: Option<Vec<f64>> = row.get(31);
        let stack_orientation_raw: String = row.get(32);

        out.push(StackFingerprint {
            series_stack_id: row.get(0),
            series_id: row.get(1),
            study_id: row.get(2),
            subject_id: row.get(3),
            cohort_id: row.get(4),
            modality: modality_raw.as_deref().and_then(Modality::parse),
            manufacturer: row.get(6),
            manufacturer_model_name: row.get(7),
            text_search_blob: row.get(8),
            contrast_search_blob: row.get(9),
            parsed_image_type: row.get(10),
            parsed_scanning_sequence: row.get(11),
            parsed_sequence_variant: row.get(12),
            parsed_scan_options: row.get(13),
            parsed_sequence_name: row.get(14),
            repetition_time: row.get(15),
            echo_time: row.get(16),
            inversion_time: row.get(17),
            flip_angle: row.get(18),
            echo_train_length: row.get(19),
            echo_numbers: row.get(20),
            b_values: row.get(21),
            receive_coil_name: row.get(22),
            kvp: row.get(23),
            exposure: row.get(24),
            tube_current: row.get(25),
            bed_index: row.get(26),
            frame_type: row.get(27),
            field_of_view: row.get(28),
            aspect_ratio: row.get(29),
            slice_count: row.get(30),
            image_orientation_patient: iop.and_then(|v| v.try_into().ok()),
            stack_orientation: match stack_orientation_raw.as_str() {
                "coronal" => dcmforge_core::entities::StackOrientation::Coronal,
                "sagittal" => dcmforge_core::entities::StackOrientation::Sagittal,
                _ => dcmforge_core::entities::StackOrientation::Axial,
            },
            orientation_confidence: row.get(33),
            mr_field_strength: row.get(34),
            mr_acquisition_type: row.get(35),
            contrast_bolus_agent_present: row.get(36),
        });
    }
    Ok(out)
}

async fn upsert_cache(client: &deadpool_postgres::Client, batch: &[SeriesClassificationCache]) -> SortResult<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let series_stack_ids: Vec<Uuid> = batch.iter().map(|c| c.series_stack_id).collect();
    let bases: Vec<Option<String>> = batch.iter().map(|c| c.base.clone()).collect();
    let techniques: Vec<Option<String>> = batch.iter().map(|c| c.technique.clone()).collect();
    let modifier_csvs: Vec<String> = batch.iter().map(|c| c.modifier_csv.clone()).collect();
    let construct_csvs: Vec<String> = batch.iter().map(|c| c.construct_csv.clone()).collect();
    let provenances: Vec<Option<String>> = batch.iter().map(|c| c.provenance.clone()).collect();
    let acceleration_csvs: Vec<String> = batch.iter().map(|c| c.acceleration_csv.clone()).collect();
    let directory_types: Vec<&'static str> = batch.iter().map(|c| c.directory_type.as_str()).collect();
    let post_contrasts: Vec<Option<bool>> = batch.iter().map(|c| c.post_contrast).collect();
    let spinal_cords: Vec<Option<bool>> = batch.iter().map(|c| c.spinal_cord).collect();
    let localizers: Vec<bool> = batch.iter().map(|c| c.localizer).collect();
    let manual_reviews: Vec<bool> = batch.iter().map(|c| c.manual_review_required).collect();
    let review_reasons: Vec<String> = batch.iter().map(|c| c.manual_review_reasons_csv.clone()).collect();

    client
        .execute(
            "INSERT INTO series_classification_cache ( \
                series_stack_id, base, technique, modifier_csv, construct_csv, provenance, \
                acceleration_csv, directory_type, post_contrast, spinal_cord, localizer, \
                manual_review_required, manual_review_reasons_csv \
             ) SELECT * FROM UNNEST( \
                $1::uuid[], $2::text[], $3::text[], $4::text[], $5::text[], $6::text[], \
                $7::text[], $8::text[], $9::bool[], $10::bool[], $11::bool[], \
                $12::bool[], $13::text[] \
             ) \
             ON CONFLICT (series_stack_id) DO UPDATE SET \
                base = EXCLUDED.base, technique = EXCLUDED.technique, \
                modifier_csv = EXCLUDED.modifier_csv, construct_csv = EXCLUDED.construct_csv, \
                provenance = EXCLUDED.provenance, acceleration_csv = EXCLUDED.acceleration_csv, \
                directory_type = EXCLUDED.directory_type, post_contrast = EXCLUDED.post_contrast, \
                spinal_cord = EXCLUDED.spinal_cord, localizer = EXCLUDED.localizer, \
                manual_review_required = EXCLUDED.manual_review_required, \
                manual_review_reasons_csv = EXCLUDED.manual_review_reasons_csv",
            &[
                &series_stack_ids,
                &bases,
                &techniques,
                &modifier_csvs,
                &construct_csvs,
                &provenances,
                &acceleration_csvs,
                &directory_types,
                &post_contrasts,
                &spinal_cords,
                &localizers,
                &manual_reviews,
                &review_reasons,
            ],
        )
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_cache_flags_manual_review() {
        let cache = error_cache(Uuid::nil());
        assert_eq!(cache.directory_type, DirectoryType::Misc);
        assert!(cache.manual_review_required);
        assert!(cache.manual_review_reasons_csv.contains("classification:error"));
    }

    #[test]
    fn classify_batch_handles_normal_fingerprints() {
        let pipeline = Pipeline::new(ClassificationConfig::embedded().unwrap());
        let mut fp = StackFingerprint::default();
        fp.parsed_sequence_name = vec!["is_mprage".to_string()];
        let results = classify_batch(&pipeline, std::slice::from_ref(&fp));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].base.as_deref(), Some("T1w"));
    }
}
