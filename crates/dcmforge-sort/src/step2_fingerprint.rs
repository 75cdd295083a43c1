//! Step 2 Fingerprint Materialization (§4.10): refreshes `stack_n_instances`,
//! derives `stack_key` for multi-stack series, and upserts one
//! `stack_fingerprint` row per stack from a wide join across the series,
//! study, subject and modality-detail tables.
//!
//! The wide join is loaded into a `polars` frame (grounded on
//! `P2GX-PhenoXtract`'s collector style) purely for the vectorized text
//! normalization pass; the upsert itself reuses the `UNNEST`-based bulk
//! insert idiom from `dcmforge-store::writer` rather than `COPY`, since a
//! per-column array bind already keeps parameter count constant regardless
//! of batch size.

use std::collections::HashMap;

use dcmforge_core::entities::{Modality, StackFingerprint, StackOrientation};
use dcmforge_core::signature::{derive_stack_key, StackSignature};
use dcmforge_core::text::{Normalizer, NormalizerConfig};
use dcmforge_job::JobControl;
use dcmforge_store::StorePool;
use polars::prelude::*;
use uuid::Uuid;

use crate::error::{SortError, SortResult};
use crate::handover::{Step2Handover, Step2Metrics, StepOutcome};

/// Rows are upserted in batches no larger than this (§4.10 step 4).
const UPSERT_BATCH_ROWS: usize = 50_000;

pub struct Step2Config {
    pub cohort_id: Uuid,
}

pub async fn run(
    pool: &StorePool,
    control: &JobControl,
    config: Step2Config,
    input_series_ids: &[Uuid],
) -> SortResult<StepOutcome<Step2Handover>> {
    control.checkpoint().await?;
    let mut metrics = Step2Metrics::default();

    let client = pool.pool().get().await?;

    let stack_count: i64 = client
        .query_one(
            "SELECT COUNT(*) FROM series_stack WHERE series_id = ANY($1)",
            &[&input_series_ids],
        )
        .await?
        .get(0);
    if stack_count == 0 {
        return Err(SortError::NoStacksForInputSeries(input_series_ids.len()));
    }

    client
        .execute(
            "UPDATE series_stack ss SET stack_n_instances = c.cnt \
             FROM (SELECT series_stack_id, COUNT(*) AS cnt FROM instance \
                   WHERE series_id = ANY($1) GROUP BY series_stack_id) c \
             WHERE ss.id = c.series_stack_id",
            &[&input_series_ids],
        )
        .await?;
    metrics.stacks_instance_count_updated = stack_count as usize;

    control.checkpoint().await?;

    metrics.multi_stack_series = assign_stack_keys(&client, input_series_ids).await?;
    metrics.stack_keys_assigned = metrics.multi_stack_series;

    control.checkpoint().await?;

    let fingerprints = load_fingerprints(&client, config.cohort_id, input_series_ids).await?;
    let fingerprints = normalize_text_blobs(fingerprints)?;

    for (modality, count) in fingerprint_modality_breakdown(&fingerprints) {
        metrics.modality_breakdown.insert(modality, count);
    }
    metrics.series_processed = input_series_ids.len();
    metrics.stacks_materialized = fingerprints.len();

    let mut series_stack_ids = Vec::with_capacity(fingerprints.len());
    for chunk in fingerprints.chunks(UPSERT_BATCH_ROWS) {
        upsert_fingerprints(&client, chunk).await?;
        series_stack_ids.extend(chunk.iter().map(|f| f.series_stack_id));
        metrics.upsert_batches += 1;
        control.checkpoint().await?;
    }

    let handover = Step2Handover { series_stack_ids };
    Ok(StepOutcome::complete(
        handover,
        format!(
            "{} stacks materialized across {} upsert batches",
            metrics.stacks_materialized, metrics.upsert_batches
        ),
        serde_json::to_value(&metrics).unwrap_or_default(),
    ))
}

/// Computes and persists `stack_key` for every series with more than one
/// stack (§4.2): the same key is assigned to all of that series' stacks.
async fn assign_stack_keys(client: &deadpool_postgres::Client, series_ids: &[Uuid]) -> SortResult<usize> {
    let rows = client
        .query(
            "SELECT series_id, id, signature_json FROM series_stack \
             WHERE series_id = ANY($1) ORDER BY series_id, stack_index",
            &[&series_ids],
        )
        .await?;

    let mut by_series: HashMap<Uuid, Vec<(Uuid, StackSignature)>> = HashMap::new();
    for row in &rows {
        let series_id: Uuid = row.get(0);
        let stack_id: Uuid = row.get(1);
        let signature_json: String = row.get(2);
        if let Ok(signature) = serde_json::from_str::<StackSignature>(&signature_json) {
            by_series.entry(series_id).or_default().push((stack_id, signature));
        }
    }

    let mut multi_stack_series = 0usize;
    for (_series_id, stacks) in by_series {
        if stacks.len() <= 1 {
            continue;
        }
        let signatures: Vec<StackSignature> = stacks.iter().map(|(_, s)| s.clone()).collect();
        if let Some(key) = derive_stack_key(&signatures) {
            let stack_ids: Vec<Uuid> = stacks.iter().map(|(id, _)| *id).collect();
            client
                .execute(
                    "UPDATE series_stack SET stack_key = $1 WHERE id = ANY($2)",
                    &[&key, &stack_ids],
                )
                .await?;
            multi_stack_series += 1;
        }
    }
    Ok(multi_stack_series)
}

/// Reconstructs stack-level fields from `signature_json` (the only place
/// the rounded physics values already live) and joins series/study/subject
/// and the modality-detail tables for everything else.
async fn load_fingerprints(
    client: &deadpool_postgres::Client,
    cohort_id: Uuid,
    series_ids: &[Uuid],
) -> SortResult<Vec<StackFingerprint>> {
    let rows = client
        .query(
            "SELECT ss.id, ss.series_id, s.study_id, st.subject_id, ss.signature_json, \
                    ss.stack_orientation, ss.orientation_confidence, s.modality, \
                    mri.manufacturer, mri.manufacturer_model_name, mri.field_strength, mri.acquisition_type, \
                    ct.manufacturer, ct.manufacturer_model_name, \
                    pet.manufacturer, pet.manufacturer_model_name \
             FROM series_stack ss \
             JOIN series s ON s.id = ss.series_id \
             JOIN study st ON st.id = s.study_id \
             JOIN subject_cohorts sc ON sc.subject_id = st.subject_id AND sc.cohort_id = $1 \
             LEFT JOIN mri_series_details mri ON mri.series_id = s.id \
             LEFT JOIN ct_series_details ct ON ct.series_id = s.id \
             LEFT JOIN pet_series_details pet ON pet.series_id = s.id \
             WHERE ss.series_id = ANY($2)",
            &[&cohort_id, &series_ids],
        )
        .await?;

    let mut fingerprints = Vec::with_capacity(rows.len());
    for row in &rows {
        let series_stack_id: Uuid = row.get(0);
        let series_id: Uuid = row.get(1);
        let study_id: Uuid = row.get(2);
        let subject_id: Uuid = row.get(3);
        let signature_json: String = row.get(4);
        let stack_orientation_raw: String = row.get(5);
        let orientation_confidence: f64 = row.get(6);
        let modality_raw: String = row.get(7);

        let mri_manufacturer: Option<String> = row.get(8);
        let mri_model: Option<String> = row.get(9);
        let field_strength: Option<f64> = row.get(10);
        let acquisition_type: Option<String> = row.get(11);
        let ct_manufacturer: Option<String> = row.get(12);
        let ct_model: Option<String> = row.get(13);
        let pet_manufacturer: Option<String> = row.get(14);
        let pet_model: Option<String> = row.get(15);

        let modality = Modality::parse(&modality_raw);
        let (manufacturer, manufacturer_model_name) = match modality {
            Some(Modality::Mr) => (mri_manufacturer, mri_model),
            Some(Modality::Ct) => (ct_manufacturer, ct_model),
            Some(Modality::Pt) => (pet_manufacturer, pet_model),
            None => (None, None),
        };

        let stack_orientation = match stack_orientation_raw.as_str() {
            "coronal" => StackOrientation::Coronal,
            "sagittal" => StackOrientation::Sagittal,
            _ => StackOrientation::Axial,
        };

        let mut fp = StackFingerprint {
            series_stack_id,
            series_id,
            study_id,
            subject_id,
            cohort_id,
            modality,
            manufacturer,
            manufacturer_model_name,
            stack_orientation,
            orientation_confidence,
            mr_field_strength: field_strength,
            mr_acquisition_type: acquisition_type,
            ..Default::default()
        };

        if let Ok(signature) = serde_json::from_str::<StackSignature>(&signature_json) {
            apply_signature_fields(&mut fp, &signature);
        }

        fingerprints.push(fp);
    }
    Ok(fingerprints)
}

/// Copies the rounded values already captured in `StackSignature` onto the
/// fingerprint. These are the only per-stack physics fields the current
/// schema persists; everything the signature doesn't carry (scanning
/// sequence, sequence variant, b_values, FOV, slice count...) stays at its
/// default until extraction captures those tags directly (see DESIGN.md).
fn apply_signature_fields(fp: &mut StackFingerprint, signature: &StackSignature) {
    match signature {
        StackSignature::Mr {
            echo_time_centi,
            inversion_time_deci,
            echo_numbers,
            echo_train_length,
            repetition_time_deci,
            flip_angle_deci,
            receive_coil_name,
            image_type,
            ..
        } => {
            fp.echo_time = echo_time_centi.map(|v| v as f64 / 100.0);
            fp.inversion_time = inversion_time_deci.map(|v| v as f64 / 10.0);
            fp.echo_numbers = *echo_numbers;
            fp.echo_train_length = *echo_train_length;
            fp.repetition_time = repetition_time_deci.map(|v| v as f64 / 10.0);
            fp.flip_angle = flip_angle_deci.map(|v| v as f64 / 10.0);
            fp.receive_coil_name = receive_coil_name.clone();
            fp.parsed_image_type = image_type.clone();
        }
        StackSignature::Ct {
            kvp_int,
            exposure_int,
            tube_current_int,
            image_type,
            ..
        } => {
            fp.kvp = kvp_int.map(|v| v as f64);
            fp.exposure = exposure_int.map(|v| v as f64);
            fp.tube_current = tube_current_int.map(|v| v as f64);
            fp.parsed_image_type = image_type.clone();
        }
        StackSignature::Pet {
            bed_index,
            frame_type,
            image_type,
            ..
        } => {
            fp.bed_index = *bed_index;
            fp.frame_type = frame_type.clone();
            fp.parsed_image_type = image_type.clone();
        }
    }
}

/// Vectorized pass (§4.1): builds `text_search_blob`/`contrast_search_blob`
/// from the parsed free-text fields via a `polars` string column so the
/// normalizer runs once over the whole batch rather than being re-invoked
/// ad hoc per detector.
fn normalize_text_blobs(mut fingerprints: Vec<StackFingerprint>) -> SortResult<Vec<StackFingerprint>> {
    let normalizer = Normalizer::new(NormalizerConfig::default());

    let raw: Vec<String> = fingerprints
        .iter()
        .map(|fp| {
            let mut parts = fp.parsed_image_type.clone();
            parts.extend(fp.parsed_sequence_name.clone());
            parts.extend(fp.parsed_scan_options.clone());
            if let Some(name) = &fp.mr_acquisition_type {
                parts.push(name.clone());
            }
            parts.join(" ")
        })
        .collect();

    let column = Series::new("raw_text".into(), raw);
    let ca = column.str().map_err(|e| SortError::EmptyScope(format!("polars column error: {e}")))?;

    let normalized: Vec<String> = ca
        .into_iter()
        .map(|opt| normalizer.normalize(opt.unwrap_or_default()))
        .collect();

    for (fp, blob) in fingerprints.iter_mut().zip(normalized.into_iter()) {
        let contrast_present = blob.contains("gd") || blob.contains("contrast") || fp.contrast_bolus_agent_present;
        fp.contrast_bolus_agent_present = contrast_present;
        fp.contrast_search_blob = if contrast_present {
            normalizer.normalize(&blob)
        } else {
            String::new()
        };
        fp.text_search_blob = blob;
    }

    Ok(fingerprints)
}

fn fingerprint_modality_breakdown(fingerprints: &[StackFingerprint]) -> HashMap<String, usize> {
    let mut breakdown = HashMap::new();
    for fp in fingerprints {
        let key = fp.modality.map(|m| m.as_str().to_string()).unwrap_or_else(|| "unknown".to_string());
        *breakdown.entry(key).or_insert(0) += 1;
    }
    breakdown
}

/// Bulk upsert via `UNNEST`: one bind parameter per column regardless of
/// batch size (the idiom `dcmforge-store::writer` already established for
/// entity merges), so a 50,000-row batch never risks the parameter budget.
async fn upsert_fingerprints(client: &deadpool_postgres::Client, batch: &[StackFingerprint]) -> SortResult<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let series_stack_ids: Vec<Uuid> = batch.iter().map(|f| f.series_stack_id).collect();
    let series_ids: Vec<Uuid> = batch.iter().map(|f| f.series_id).collect();
    let study_ids: Vec<Uuid> = batch.iter().map(|f| f.study_id).collect();
    let subject_ids: Vec<Uuid> = batch.iter().map(|f| f.subject_id).collect();
    let cohort_ids: Vec<Uuid> = batch.iter().map(|f| f.cohort_id).collect();
    let modalities: Vec<Option<&'static str>> = batch.iter().map(|f| f.modality.map(Modality::as_str)).collect();
    let manufacturers: Vec<Option<String>> = batch.iter().map(|f| f.manufacturer.clone()).collect();
    let models: Vec<Option<String>> = batch.iter().map(|f| f.manufacturer_model_name.clone()).collect();
    let text_blobs: Vec<String> = batch.iter().map(|f| f.text_search_blob.clone()).collect();
    let contrast_blobs: Vec<String> = batch.iter().map(|f| f.contrast_search_blob.clone()).collect();
    let image_types: Vec<Vec<String>> = batch.iter().map(|f| f.parsed_image_type.clone()).collect();
    let scanning_sequences: Vec<Vec<String>> = batch.iter().map(|f| f.parsed_scanning_sequence.clone()).collect();
    let sequence_variants: Vec<Vec<String>> = batch.iter().map(|f| f.parsed_sequence_variant.clone()).collect();
    let scan_options: Vec<Vec<String>> = batch.iter().map(|f| f.parsed_scan_options.clone()).collect();
    let sequence_names: Vec<Vec<String>> = batch.iter().map(|f| f.parsed_sequence_name.clone()).collect();
    let repetition_times: Vec<Option<f64>> = batch.iter().map(|f| f.repetition_time).collect();
    let echo_times: Vec<Option<f64>> = batch.iter().map(|f| f.echo_time).collect();
    let inversion_times: Vec<Option<f64>> = batch.iter().map(|f| f.inversion_time).collect();
    let flip_angles: Vec<Option<f64>> = batch.iter().map(|f| f.flip_angle).collect();
    let echo_train_lengths: Vec<Option<i32>> = batch.iter().map(|f| f.echo_train_length).collect();
    let echo_numbers: Vec<Option<i32>> = batch.iter().map(|f| f.echo_numbers).collect();
    let b_values: Vec<Vec<f64>> = batch.iter().map(|f| f.b_values.clone()).collect();
    let coil_names: Vec<Option<String>> = batch.iter().map(|f| f.receive_coil_name.clone()).collect();
    let kvps: Vec<Option<f64>> = batch.iter().map(|f| f.kvp).collect();
    let exposures: Vec<Option<f64>> = batch.iter().map(|f| f.exposure).collect();
    let tube_currents: Vec<Option<f64>> = batch.iter().map(|f| f.tube_current).collect();
    let bed_indices: Vec<Option<i32>> = batch.iter().map(|f| f.bed_index).collect();
    let frame_types: Vec<Option<String>> = batch.iter().map(|f| f.frame_type.clone()).collect();
    let field_of_views: Vec<Option<f64>> = batch.iter().map(|f| f.field_of_view).collect();
    let aspect_ratios: Vec<Option<f64>> = batch.iter().map(|f| f.aspect_ratio).collect();
    let slice_counts: Vec<Option<i32>> = batch.iter().map(|f| f.slice_count).collect();
    let orientations_raw: Vec<Option<Vec<f64>>> = batch
        .iter()
        .map(|f| f.image_orientation_patient.map(|iop| iop.to_vec()))
        .collect();
    let stack_orientations: Vec<&'static str> = batch
        .iter()
        .map(|f| match f.stack_orientation {
            StackOrientation::Axial => "axial",
            StackOrientation::Coronal => "coronal",
            StackOrientation::Sagittal => "sagittal",
        })
        .collect();
    let orientation_confidences: Vec<f64> = batch.iter().map(|f| f.orientation_confidence).collect();
    let field_strengths: Vec<Option<f64>> = batch.iter().map(|f| f.mr_field_strength).collect();
    let acquisition_types: Vec<Option<String>> = batch.iter().map(|f| f.mr_acquisition_type.clone()).collect();
    let contrast_flags: Vec<bool> = batch.iter().map(|f| f.contrast_bolus_agent_present).collect();

    client
        .execute(
            "INSERT INTO stack_fingerprint ( \
                series_stack_id, series_id, study_id, subject_id, cohort_id, modality, \
                manufacturer, manufacturer_model_name, text_search_blob, contrast_search_blob, \
                parsed_image_type, parsed_scanning_sequence, parsed_sequence_variant, \
                parsed_scan_options, parsed_sequence_name, repetition_time, echo_time, \
                inversion_time, flip_angle, echo_train_length, echo_numbers, b_values, \
                receive_coil_name, kvp, exposure, tube_current, bed_index, frame_type, \
                field_of_view, aspect_ratio, slice_count, image_orientation_patient, \
                stack_orientation, orientation_confidence, mr_field_strength, mr_acquisition_type, \
                contrast_bolus_agent_present \
             ) SELECT * FROM UNNEST( \
                $1::uuid[], $2::uuid[], $3::uuid[], $4::uuid[], $5::uuid[], $6::text[], \
                $7::text[], $8::text[], $9::text[], $10::text[], \
                $11::text[][], $12::text[][], $13::text[][], \
                $14::text[][], $15::text[][], $16::float8[], $17::float8[], \
                $18::float8[], $19::float8[], $20::int[], $21::int[], $22::float8[][], \
                $23::text[], $24::float8[], $25::float8[], $26::float8[], $27::int[], $28::text[], \
                $29::float8[], $30::float8[], $31::int[], $32::float8[][], \
                $33::text[], $34::float8[], $35::float8[], $36::text[], \
                $37::bool[] \
             ) \
             ON CONFLICT (series_stack_id) DO UPDATE SET \
                modality = EXCLUDED.modality, manufacturer = EXCLUDED.manufacturer, \
                manufacturer_model_name = EXCLUDED.manufacturer_model_name, \
                text_search_blob = EXCLUDED.text_search_blob, \
                contrast_search_blob = EXCLUDED.contrast_search_blob, \
                parsed_image_type = EXCLUDED.parsed_image_type, \
                parsed_scanning_sequence = EXCLUDED.parsed_scanning_sequence, \
                parsed_sequence_variant = EXCLUDED.parsed_sequence_variant, \
                parsed_scan_options = EXCLUDED.parsed_scan_options, \
                parsed_sequence_name = EXCLUDED.parsed_sequence_name, \
                repetition_time = EXCLUDED.repetition_time, echo_time = EXCLUDED.echo_time, \
                inversion_time = EXCLUDED.inversion_time, flip_angle = EXCLUDED.flip_angle, \
                echo_train_length = EXCLUDED.echo_train_length, echo_numbers = EXCLUDED.echo_numbers, \
                b_values = EXCLUDED.b_values, receive_coil_name = EXCLUDED.receive_coil_name, \
                kvp = EXCLUDED.kvp, exposure = EXCLUDED.exposure, tube_current = EXCLUDED.tube_current, \
                bed_index = EXCLUDED.bed_index, frame_type = EXCLUDED.frame_type, \
                field_of_view = EXCLUDED.field_of_view, aspect_ratio = EXCLUDED.aspect_ratio, \
                slice_count = EXCLUDED.slice_count, \
                image_orientation_patient = EXCLUDED.image_orientation_patient, \
                stack_orientation = EXCLUDED.stack_orientation, \
                orientation_confidence = EXCLUDED.orientation_confidence, \
                mr_field_strength = EXCLUDED.mr_field_strength, \
                mr_acquisition_type = EXCLUDED.mr_acquisition_type, \
                contrast_bolus_agent_present = EXCLUDED.contrast_bolus_agent_present",
            &[
                &series_stack_ids,
                &series_ids,
                &study_ids,
                &subject_ids,
                &cohort_ids,
                &modalities,
                &manufacturers,
                &models,
                &text_blobs,
                &contrast_blobs,
                &image_types,
                &scanning_sequences,
                &sequence_variants,
                &scan_options,
                &sequence_names,
                &repetition_times,
                &echo_times,
                &inversion_times,
                &flip_angles,
                &echo_train_lengths,
                &echo_numbers,
                &b_values,
                &coil_names,
                &kvps,
                &exposures,
                &tube_currents,
                &bed_indices,
                &frame_types,
                &field_of_views,
                &aspect_ratios,
                &slice_counts,
                &orientations_raw,
                &stack_orientations,
                &orientation_confidences,
                &field_strengths,
                &acquisition_types,
                &contrast_flags,
            ],
        )
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modality_breakdown_counts_by_modality() {
        let mut a = StackFingerprint::default();
        a.modality = Some(Modality::Mr);
        let mut b = StackFingerprint::default();
        b.modality = Some(Modality::Mr);
        let mut c = StackFingerprint::default();
        c.modality = Some(Modality::Ct);
        let breakdown = fingerprint_modality_breakdown(&[a, b, c]);
        assert_eq!(breakdown.get("MR"), Some(&2));
        assert_eq!(breakdown.get("CT"), Some(&1));
    }

    #[test]
    fn normalize_text_blobs_populates_search_blob() {
        let mut fp = StackFingerprint::default();
        fp.parsed_image_type = vec!["t1".to_string(), "flair".to_string()];
        let result = normalize_text_blobs(vec![fp]).unwrap();
        assert_eq!(result[0].text_search_blob, "t1 flair");
    }

    #[test]
    fn apply_signature_fields_recovers_mr_physics() {
        let mut fp = StackFingerprint::default();
        let sig = StackSignature::Mr {
            echo_time_centi: Some(290),
            inversion_time_deci: None,
            echo_numbers: Some(1),
            echo_train_length: None,
            repetition_time_deci: Some(20000),
            flip_angle_deci: Some(900),
            receive_coil_name: Some("HeadCoil".to_string()),
            orientation: dcmforge_core::signature::StackOrientationKey(StackOrientation::Axial),
            image_type: vec!["is_mprage".to_string()],
        };
        apply_signature_fields(&mut fp, &sig);
        assert_eq!(fp.echo_time, Some(2.9));
        assert_eq!(fp.repetition_time, Some(2000.0));
        assert_eq!(fp.flip_angle, Some(90.0));
        assert_eq!(fp.parsed_image_type, vec!["is_mprage".to_string()]);
    }

}
