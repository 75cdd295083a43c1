//! Step 4 Completion (§4.12): the seven-phase state machine that runs after
//! classification to normalize field strength, flag low-confidence
//! orientations, infer acquisition type, fill still-unresolved base/technique
//! by physics-bucketed similarity against already-classified MR stacks,
//! re-synthesize intent for anything that move unstuck, flag duplicate
//! contrast predictions within a study, and persist everything in one
//! transaction.
//!
//! Idempotent on re-run: every phase is a pure function of the current row
//! plus the reference set, so running it twice against the same database
//! produces the same output the second time.

use std::collections::HashMap;

use dcmforge_core::entities::{DirectoryType, Modality, SeriesClassificationCache, StackFingerprint};
use dcmforge_job::JobControl;
use dcmforge_store::StorePool;
use uuid::Uuid;

use crate::error::SortResult;
use crate::handover::{Step4Handover, Step4Metrics, StepOutcome};

/// Provenances excluded from Phase 3's reference pool: these are synthetic
/// reconstructions whose base/technique don't reflect genuine acquisition
/// physics (§4.12 phase 3).
const EXCLUDED_REFERENCE_PROVENANCES: &[&str] = &["SyMRI", "SWIRecon", "EPIMix", "BOLDRecon"];
const STANDARD_FIELD_STRENGTHS: &[f64] = &[0.5, 1.0, 1.5, 3.0, 7.0];
const GAUSS_THRESHOLD: f64 = 100.0;
const GAUSS_TO_TESLA: f64 = 10_000.0;
const LOW_ORIENTATION_CONFIDENCE: f64 = 0.85;
const MIN_SIMILARITY_CANDIDATES: usize = 3;

struct Stack {
    fingerprint: StackFingerprint,
    cache: SeriesClassificationCache,
    /// Set once a phase changes `base`/`technique`/`directory_type`, so
    /// Phase 4 only re-synthesizes intent for rows this run actually moved.
    touched: bool,
}

pub async fn run(
    pool: &StorePool,
    control: &JobControl,
    series_stack_ids: &[Uuid],
) -> SortResult<StepOutcome<Step4Handover>> {
    control.checkpoint().await?;
    let mut metrics = Step4Metrics::default();

    let client = pool.pool().get().await?;
    let mut stacks = load_stacks(&client, series_stack_ids).await?;

    // Phase 0: field strength normalization.
    for stack in &mut stacks {
        phase0_field_strength(stack, &mut metrics);
    }
    control.checkpoint().await?;

    // Phase 1: orientation confidence flag.
    for stack in &mut stacks {
        phase1_orientation_flag(stack, &mut metrics);
    }
    control.checkpoint().await?;

    // Phase 2: acquisition type inference.
    for stack in &mut stacks {
        phase2_acquisition_type(stack, &mut metrics);
    }
    control.checkpoint().await?;

    // Phase 3 (+3B): physics-bucketed base/technique fill, sourced from the
    // full reference pool of already-classified MR stacks.
    let reference_pool = load_reference_pool(&client, &EXCLUDED_REFERENCE_PROVENANCES.iter().map(|s| s.to_string()).collect::<Vec<_>>()).await?;
    for stack in &mut stacks {
        phase3_similarity_fill(stack, &reference_pool, &mut metrics);
    }
    control.checkpoint().await?;

    // Phase 4: intent re-synthesis for anything Phase 2/3 touched.
    for stack in &mut stacks {
        phase4_intent_resynthesis(stack, &mut metrics);
    }
    control.checkpoint().await?;

    // Phase 4B: contrast-conflict detection across single-stack series
    // sharing (subject, study_date, physics key).
    phase4b_contrast_conflicts(&client, &mut stacks, &mut metrics).await?;
    control.checkpoint().await?;

    // Phase 5: persist both tables in one transaction.
    let mut write_client = pool.pool().get().await?;
    persist(&mut write_client, &stacks).await?;

    let handover = Step4Handover {
        series_stack_ids: stacks.iter().map(|s| s.cache.series_stack_id).collect(),
    };
    Ok(StepOutcome::complete(
        handover,
        format!(
            "{} stacks completed, {} manual-review increments",
            stacks.len(),
            metrics.manual_review_incremented
        ),
        serde_json::to_value(&metrics).unwrap_or_default(),
    ))
}

/// Phase 0 (§4.12): scanners occasionally report field strength in Gauss;
/// values above [`GAUSS_THRESHOLD`] are assumed Gauss and divided down, then
/// every value snaps to the nearest standard Tesla rating.
fn phase0_field_strength(stack: &mut Stack, metrics: &mut Step4Metrics) {
    let Some(raw) = stack.fingerprint.mr_field_strength else {
        return;
    };
    if !matches!(stack.fingerprint.modality, Some(Modality::Mr)) {
        return;
    }

    let tesla = if raw > GAUSS_THRESHOLD {
        metrics.field_strength_assumed_gauss += 1;
        raw / GAUSS_TO_TESLA
    } else {
        raw
    };

    let nearest = STANDARD_FIELD_STRENGTHS
        .iter()
        .copied()
        .min_by(|a, b| (a - tesla).abs().partial_cmp(&(b - tesla).abs()).unwrap())
        .unwrap_or(tesla);

    if (nearest - stack.fingerprint.mr_field_strength.unwrap_or(nearest)).abs() > f64::EPSILON {
        stack.fingerprint.mr_field_strength = Some(nearest);
        metrics.field_strength_normalized += 1;
    }
}

/// Phase 1 (§4.12): flags stacks whose orientation the signature step
/// couldn't confidently categorize.
fn phase1_orientation_flag(stack: &mut Stack, metrics: &mut Step4Metrics) {
    if stack.fingerprint.orientation_confidence < LOW_ORIENTATION_CONFIDENCE {
        let mut reasons = stack.cache.review_reasons();
        let token = dcmforge_core::review::token("orientation", "low_confidence");
        if !reasons.contains(&token) {
            reasons.push(token);
            stack.cache.set_review_reasons(reasons);
            metrics.orientation_low_confidence_flagged += 1;
            metrics.manual_review_incremented += 1;
        }
    }
}

/// Phase 2 (§4.12): fills `mr_acquisition_type` when still unset, via an
/// exclusive-flag check on `parsed_image_type`, then a text-pattern search,
/// then falling back to what the technique axis already implies.
fn phase2_acquisition_type(stack: &mut Stack, metrics: &mut Step4Metrics) {
    if stack.fingerprint.mr_acquisition_type.is_some() {
        return;
    }
    if !matches!(stack.fingerprint.modality, Some(Modality::Mr)) {
        return;
    }

    let inferred = infer_acquisition_type_from_flags(&stack.fingerprint)
        .or_else(|| infer_acquisition_type_from_text(&stack.fingerprint.text_search_blob))
        .or_else(|| infer_acquisition_type_from_technique(stack.cache.technique.as_deref()));

    if let Some(value) = inferred {
        stack.fingerprint.mr_acquisition_type = Some(value);
        metrics.acquisition_type_inferred += 1;
    }
}

fn infer_acquisition_type_from_flags(fingerprint: &StackFingerprint) -> Option<String> {
    let is_3d = fingerprint.parsed_image_type.iter().any(|t| t == "is_3d");
    let is_2d = fingerprint.parsed_image_type.iter().any(|t| t == "is_2d");
    match (is_3d, is_2d) {
        (true, false) => Some("3D".to_string()),
        (false, true) => Some("2D".to_string()),
        _ => None,
    }
}

fn infer_acquisition_type_from_text(text_search_blob: &str) -> Option<String> {
    if text_search_blob.contains("3d") {
        Some("3D".to_string())
    } else if text_search_blob.contains("2d") {
        Some("2D".to_string())
    } else {
        None
    }
}

fn infer_acquisition_type_from_technique(technique: Option<&str>) -> Option<String> {
    match technique {
        Some("MPRAGE") | Some("SPGR") | Some("BRAVO") => Some("3D".to_string()),
        Some("HASTE") | Some("FSE") | Some("SE-EPI") => Some("2D".to_string()),
        _ => None,
    }
}

/// One (field_strength, orientation, echo bin, repetition bin) bucket, from
/// coarsest to finest — widened in that order when the exact bucket has
/// fewer than [`MIN_SIMILARITY_CANDIDATES`] reference stacks (§4.12 phase 3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PhysicsKey {
    field_strength_deci: Option<i64>,
    orientation: &'static str,
    echo_bin: Option<i64>,
    repetition_bin: Option<i64>,
}

fn physics_key(fingerprint: &StackFingerprint, widen: usize) -> PhysicsKey {
    let orientation = match fingerprint.stack_orientation {
        dcmforge_core::entities::StackOrientation::Axial => "axial",
        dcmforge_core::entities::StackOrientation::Coronal => "coronal",
        dcmforge_core::entities::StackOrientation::Sagittal => "sagittal",
    };
    PhysicsKey {
        field_strength_deci: fingerprint.mr_field_strength.map(|v| (v * 10.0).round() as i64),
        orientation,
        echo_bin: if widen >= 2 {
            None
        } else {
            fingerprint.echo_time.map(|v| (v / 10.0).round() as i64)
        },
        repetition_bin: if widen >= 1 {
            None
        } else {
            fingerprint.repetition_time.map(|v| (v / 500.0).round() as i64)
        },
    }
}

struct ReferenceStack {
    fingerprint: StackFingerprint,
    base: String,
    technique: String,
}

async fn load_reference_pool(
    client: &deadpool_postgres::Client,
    excluded_provenances: &[String],
) -> SortResult<Vec<ReferenceStack>> {
    let rows = client
        .query(
            "SELECT sf.series_stack_id, sf.mr_field_strength, sf.echo_time, sf.repetition_time, \
                    sf.flip_angle, sf.stack_orientation, scc.base, scc.technique \
             FROM stack_fingerprint sf \
             JOIN series_classification_cache scc ON scc.series_stack_id = sf.series_stack_id \
             WHERE sf.modality = 'MR' \
               AND scc.base IS NOT NULL AND scc.base <> 'Unknown' \
               AND scc.technique IS NOT NULL AND scc.technique <> 'Unknown' \
               AND (scc.provenance IS NULL OR NOT (scc.provenance = ANY($1)))",
            &[&excluded_provenances],
        )
        .await?;

    let mut pool = Vec::with_capacity(rows.len());
    for row in &rows {
        let stack_orientation_raw: String = row.get(5);
        let fingerprint = StackFingerprint {
            series_stack_id: row.get(0),
            mr_field_strength: row.get(1),
            echo_time: row.get(2),
            repetition_time: row.get(3),
            flip_angle: row.get(4),
            stack_orientation: match stack_orientation_raw.as_str() {
                "coronal" => dcmforge_core::entities::StackOrientation::Coronal,
                "sagittal" => dcmforge_core::entities::StackOrientation::Sagittal,
                _ => dcmforge_core::entities::StackOrientation::Axial,
            },
            modality: Some(Modality::Mr),
            ..Default::default()
        };
        pool.push(ReferenceStack {
            fingerprint,
            base: row.get(6),
            technique: row.get(7),
        });
    }
    Ok(pool)
}

/// Phase 3 (+3B) (§4.12): stacks still lacking base/technique after
/// classification get filled by mode-vote against same-physics-bucket
/// reference stacks, widening the bucket up to twice if too few candidates
/// exist. A similarity fill is never more than a low-confidence guess, so it
/// reuses the failure-mode vocabulary's `low_confidence` token per filled
/// axis rather than inventing one, and clears whatever `missing` token that
/// axis carried. Filling `base = SWI` re-routes `directory_type` to `anat`
/// and re-runs the SWI branch (3B) so construct/technique and provenance
/// reflect the branch, not the bare physics-similarity guess.
fn phase3_similarity_fill(stack: &mut Stack, reference_pool: &[ReferenceStack], metrics: &mut Step4Metrics) {
    let needs_base = stack.cache.base.is_none() || stack.cache.base.as_deref() == Some("Unknown");
    let needs_technique = stack.cache.technique.is_none() || stack.cache.technique.as_deref() == Some("Unknown");
    if !needs_base && !needs_technique {
        return;
    }
    if !matches!(stack.fingerprint.modality, Some(Modality::Mr)) {
        return;
    }

    let mut widen = 0;
    let mut candidates: Vec<&ReferenceStack> = Vec::new();
    while widen <= 2 {
        let key = physics_key(&stack.fingerprint, widen);
        candidates = reference_pool
            .iter()
            .filter(|r| physics_key(&r.fingerprint, widen) == key)
            .collect();
        if candidates.len() >= MIN_SIMILARITY_CANDIDATES || widen == 2 {
            break;
        }
        widen += 1;
    }
    if candidates.is_empty() {
        return;
    }
    if widen > 0 {
        metrics.base_technique_expanded_bin_used += 1;
    }

    let Some((base, technique)) = mode_vote(&stack.fingerprint, &candidates) else {
        return;
    };

    let mut reasons_csv = stack.cache.manual_review_reasons_csv.clone();
    let mut filled = false;
    if needs_base {
        stack.cache.base = Some(base.clone());
        reasons_csv = dcmforge_core::review::remove_axis(&reasons_csv, "base");
        reasons_csv = dcmforge_core::review::add(&reasons_csv, "base", "low_confidence");
        filled = true;
    }
    if needs_technique {
        stack.cache.technique = Some(technique);
        reasons_csv = dcmforge_core::review::remove_axis(&reasons_csv, "technique");
        reasons_csv = dcmforge_core::review::add(&reasons_csv, "technique", "low_confidence");
        filled = true;
    }

    if filled {
        metrics.base_technique_filled_by_similarity += 1;
        stack.touched = true;
        stack.cache.set_review_reasons(dcmforge_core::review::from_csv(&reasons_csv));
        metrics.manual_review_incremented += 1;

        if base == "SWI" {
            let ctx = dcmforge_core::detectors::AxisContext::new(&stack.fingerprint);
            let branch = dcmforge_core::branches::apply_branch("SWIRecon", &ctx);
            if let Some(technique) = &branch.technique {
                stack.cache.technique = Some(technique.clone());
            }
            stack.cache.construct_csv = dcmforge_core::review::to_csv(branch.construct.into_iter().collect());
            stack.cache.provenance = Some("SWIRecon".to_string());
            stack.cache.directory_type = DirectoryType::Anat;
            metrics.swi_rerouted += 1;
        }
    }
}

/// Mode-vote over (base, technique) pairs seen among the candidate pool,
/// weighted by frequency; ties break on closest echo/repetition-time
/// distance to the target stack (§4.12 phase 3).
fn mode_vote(target: &StackFingerprint, candidates: &[&ReferenceStack]) -> Option<(String, String)> {
    let mut counts: HashMap<(String, String), (usize, f64)> = HashMap::new();
    for candidate in candidates {
        let key = (candidate.base.clone(), candidate.technique.clone());
        let distance = physics_distance(target, &candidate.fingerprint);
        let entry = counts.entry(key).or_insert((0, f64::MAX));
        entry.0 += 1;
        entry.1 = entry.1.min(distance);
    }

    counts
        .into_iter()
        .max_by(|a, b| {
            a.1 .0
                .cmp(&b.1 .0)
                .then_with(|| b.1 .1.partial_cmp(&a.1 .1).unwrap_or(std::cmp::Ordering::Equal))
        })
        .map(|(key, _)| key)
}

fn physics_distance(a: &StackFingerprint, b: &StackFingerprint) -> f64 {
    let echo_delta = a.echo_time.zip(b.echo_time).map(|(x, y)| (x - y).powi(2)).unwrap_or(0.0);
    let rep_delta = a
        .repetition_time
        .zip(b.repetition_time)
        .map(|(x, y)| (x - y).powi(2))
        .unwrap_or(0.0);
    let flip_delta = a.flip_angle.zip(b.flip_angle).map(|(x, y)| (x - y).powi(2)).unwrap_or(0.0);
    (echo_delta + rep_delta + flip_delta).sqrt()
}

/// Phase 4 (§4.12): re-runs intent synthesis for anything Phase 2/3 changed.
/// A stack that's still `misc` after that gets the terminal
/// `intent:unresolved` reason (rather than staying silently unexplained).
fn phase4_intent_resynthesis(stack: &mut Stack, metrics: &mut Step4Metrics) {
    if !stack.touched {
        return;
    }
    if stack.cache.directory_type != DirectoryType::Misc {
        return;
    }
    metrics.intent_resynthesized += 1;

    let base_resolved = stack
        .cache
        .base
        .as_deref()
        .map(|b| matches!(b, "T1w" | "T2w" | "PDw" | "T2starw" | "SWI") || b.ends_with("FLAIR"))
        .unwrap_or(false);

    if base_resolved {
        stack.cache.directory_type = DirectoryType::Anat;
    } else {
        metrics.intent_unresolved += 1;
        let mut reasons = stack.cache.review_reasons();
        let token = dcmforge_core::review::token("intent", "unresolved");
        if !reasons.contains(&token) {
            reasons.push(token);
            stack.cache.set_review_reasons(reasons);
            metrics.manual_review_incremented += 1;
        }
    }
}

/// Phase 4B (§4.12): groups single-stack series sharing
/// `(subject_id, study_date, (base, technique, orientation, TE, TR))` and
/// flags `contrast:duplicate_prediction` when two or more stacks in the
/// group predicted a non-null `post_contrast`.
async fn phase4b_contrast_conflicts(
    client: &deadpool_postgres::Client,
    stacks: &mut [Stack],
    metrics: &mut Step4Metrics,
) -> SortResult<()> {
    let series_stack_ids: Vec<Uuid> = stacks.iter().map(|s| s.fingerprint.series_stack_id).collect();
    let rows = client
        .query(
            "SELECT ss.id, st.subject_id, std.study_date, ss.stack_n_instances \
             FROM series_stack ss \
             JOIN series st ON st.id = ss.series_id \
             JOIN study std ON std.id = st.study_id \
             WHERE ss.id = ANY($1)",
            &[&series_stack_ids],
        )
        .await?;

    let mut context: HashMap<Uuid, (Uuid, Option<chrono::NaiveDate>)> = HashMap::new();
    let series_counts_rows = client
        .query(
            "SELECT series_id, COUNT(*) FROM series_stack WHERE series_id IN \
             (SELECT series_id FROM series_stack WHERE id = ANY($1)) GROUP BY series_id",
            &[&series_stack_ids],
        )
        .await?;
    let single_stack_series_ids: std::collections::HashSet<Uuid> = series_counts_rows
        .iter()
        .filter(|r| r.get::<_, i64>(1) == 1)
        .map(|r| r.get(0))
        .collect();

    for row in &rows {
        let stack_id: Uuid = row.get(0);
        let subject_id: Uuid = row.get(1);
        let study_date: Option<chrono::NaiveDate> = row.get(2);
        context.insert(stack_id, (subject_id, study_date));
    }

    let mut groups: HashMap<(Uuid, Option<chrono::NaiveDate>, String), Vec<usize>> = HashMap::new();
    for (idx, stack) in stacks.iter().enumerate() {
        if stack.cache.post_contrast.is_none() {
            continue;
        }
        if !single_stack_series_ids.contains(&stack.fingerprint.series_id) {
            continue;
        }
        let Some((subject_id, study_date)) = context.get(&stack.fingerprint.series_stack_id) else {
            continue;
        };
        let physics = format!(
            "{:?}|{:?}|{:?}|{:?}|{:?}",
            stack.cache.base,
            stack.cache.technique,
            stack.fingerprint.stack_orientation,
            stack.fingerprint.echo_time.map(|v| (v * 100.0).round() as i64),
            stack.fingerprint.repetition_time.map(|v| (v * 10.0).round() as i64),
        );
        groups.entry((*subject_id, *study_date, physics)).or_default().push(idx);
    }

    for indices in groups.values() {
        if indices.len() < 2 {
            continue;
        }
        for &idx in indices {
            let stack = &mut stacks[idx];
            let mut reasons = stack.cache.review_reasons();
            let token = dcmforge_core::review::token("contrast", "duplicate_prediction");
            if !reasons.contains(&token) {
                reasons.push(token);
                stack.cache.set_review_reasons(reasons);
                metrics.contrast_duplicate_flagged += 1;
                metrics.manual_review_incremented += 1;
            }
        }
    }

    Ok(())
}

async fn load_stacks(client: &deadpool_postgres::Client, series_stack_ids: &[Uuid]) -> SortResult<Vec<Stack>> {
    let rows = client
        .query(
            "SELECT sf.series_stack_id, sf.series_id, sf.study_id, sf.subject_id, sf.cohort_id, \
                    sf.modality, sf.manufacturer, sf.manufacturer_model_name, sf.text_search_blob, \
                    sf.contrast_search_blob, sf.parsed_image_type, sf.parsed_scanning_sequence, \
                    sf.parsed_sequence_variant, sf.parsed_scan_options, sf.parsed_sequence_name, \
                    sf.repetition_time, sf.echo_time, sf.inversion_time, sf.flip_angle, \
                    sf.echo_train_length, sf.echo_numbers, sf.b_values, sf.receive_coil_name, \
                    sf.kvp, sf.exposure, sf.tube_current, sf.bed_index, sf.frame_type, \
                    sf.field_of_view, sf.aspect_ratio, sf.slice_count, sf.image_orientation_patient, \
                    sf.stack_orientation, sf.orientation_confidence, sf.mr_field_strength, \
                    sf.mr_acquisition_type, sf.contrast_bolus_agent_present, \
                    scc.base, scc.technique, scc.modifier_csv, scc.construct_csv, scc.provenance, \
                    scc.acceleration_csv, scc.directory_type, scc.post_contrast, scc.spinal_cord, \
                    scc.localizer, scc.manual_review_required, scc.manual_review_reasons_csv \
             FROM stack_fingerprint sf \
             JOIN series_classification_cache scc ON scc.series_stack_id = sf.series_stack_id \
             WHERE sf.series_stack_id = ANY($1)",
            &[&series_stack_ids],
        )
        .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let modality_raw: Option<String> = row.get(5);
        let iop: Option<Vec<f64>> = row.get(31);
        let stack_orientation_raw: String = row.get(32);
        let directory_type_raw: String = row.get(42);

        let fingerprint = StackFingerprint {
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
        };

        let cache = SeriesClassificationCache {
            series_stack_id: row.get(0),
            base: row.get(37),
            technique: row.get(38),
            modifier_csv: row.get(39),
            construct_csv: row.get(40),
            provenance: row.get(41),
            acceleration_csv: row.get(43),
            directory_type: match directory_type_raw.as_str() {
                "dwi" => DirectoryType::Dwi,
                "func" => DirectoryType::Func,
                "fmap" => DirectoryType::Fmap,
                "perf" => DirectoryType::Perf,
                "localizer" => DirectoryType::Localizer,
                "excluded" => DirectoryType::Excluded,
                "anat" => DirectoryType::Anat,
                _ => DirectoryType::Misc,
            },
            post_contrast: row.get(44),
            spinal_cord: row.get(45),
            localizer: row.get(46),
            manual_review_required: row.get(47),
            manual_review_reasons_csv: row.get(48),
        };

        out.push(Stack {
            fingerprint,
            cache,
            touched: false,
        });
    }
    Ok(out)
}

async fn persist(client: &mut deadpool_postgres::Client, stacks: &[Stack]) -> SortResult<()> {
    let tx = client.transaction().await?;

    for stack in stacks {
        tx.execute(
            "UPDATE stack_fingerprint SET mr_field_strength = $1, mr_acquisition_type = $2 WHERE series_stack_id = $3",
            &[
                &stack.fingerprint.mr_field_strength,
                &stack.fingerprint.mr_acquisition_type,
                &stack.fingerprint.series_stack_id,
            ],
        )
        .await?;

        tx.execute(
            "UPDATE series_classification_cache SET base = $1, technique = $2, directory_type = $3, \
                construct_csv = $4, provenance = $5, manual_review_required = $6, \
                manual_review_reasons_csv = $7 \
             WHERE series_stack_id = $8",
            &[
                &stack.cache.base,
                &stack.cache.technique,
                &stack.cache.directory_type.as_str(),
                &stack.cache.construct_csv,
                &stack.cache.provenance,
                &stack.cache.manual_review_required,
                &stack.cache.manual_review_reasons_csv,
                &stack.cache.series_stack_id,
            ],
        )
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp_with_field_strength(raw: f64) -> StackFingerprint {
        StackFingerprint {
            modality: Some(Modality::Mr),
            mr_field_strength: Some(raw),
            ..Default::default()
        }
    }

    #[test]
    fn phase0_snaps_to_nearest_standard_strength() {
        let mut stack = Stack {
            fingerprint: fp_with_field_strength(2.9),
            cache: SeriesClassificationCache::default(),
            touched: false,
        };
        let mut metrics = Step4Metrics::default();
        phase0_field_strength(&mut stack, &mut metrics);
        assert_eq!(stack.fingerprint.mr_field_strength, Some(3.0));
        assert_eq!(metrics.field_strength_normalized, 1);
    }

    #[test]
    fn phase0_assumes_gauss_above_threshold() {
        let mut stack = Stack {
            fingerprint: fp_with_field_strength(15000.0),
            cache: SeriesClassificationCache::default(),
            touched: false,
        };
        let mut metrics = Step4Metrics::default();
        phase0_field_strength(&mut stack, &mut metrics);
        assert_eq!(stack.fingerprint.mr_field_strength, Some(1.5));
        assert_eq!(metrics.field_strength_assumed_gauss, 1);
    }

    #[test]
    fn phase1_flags_low_confidence_orientation() {
        let mut stack = Stack {
            fingerprint: StackFingerprint {
                orientation_confidence: 0.6,
                ..Default::default()
            },
            cache: SeriesClassificationCache::default(),
            touched: false,
        };
        let mut metrics = Step4Metrics::default();
        phase1_orientation_flag(&mut stack, &mut metrics);
        assert!(stack.cache.manual_review_required);
        assert_eq!(metrics.orientation_low_confidence_flagged, 1);
    }

    #[test]
    fn phase1_does_not_flag_high_confidence() {
        let mut stack = Stack {
            fingerprint: StackFingerprint {
                orientation_confidence: 0.95,
                ..Default::default()
            },
            cache: SeriesClassificationCache::default(),
            touched: false,
        };
        let mut metrics = Step4Metrics::default();
        phase1_orientation_flag(&mut stack, &mut metrics);
        assert!(!stack.cache.manual_review_required);
    }

    #[test]
    fn mode_vote_prefers_higher_frequency() {
        let target = StackFingerprint::default();
        let a = ReferenceStack {
            fingerprint: StackFingerprint::default(),
            base: "T1w".to_string(),
            technique: "MPRAGE".to_string(),
        };
        let b = ReferenceStack {
            fingerprint: StackFingerprint::default(),
            base: "T1w".to_string(),
            technique: "MPRAGE".to_string(),
        };
        let c = ReferenceStack {
            fingerprint: StackFingerprint::default(),
            base: "T2w".to_string(),
            technique: "FSE".to_string(),
        };
        let refs = vec![&a, &b, &c];
        let (base, technique) = mode_vote(&target, &refs).unwrap();
        assert_eq!(base, "T1w");
        assert_eq!(technique, "MPRAGE");
    }

    /// §8 scenario (f): a stack with no base/technique gets filled from a
    /// same-physics-bin reference pool and flagged low-confidence on both
    /// axes, clearing whatever `missing` tokens Step 3 left behind.
    #[test]
    fn phase3_fills_base_technique_and_flags_low_confidence() {
        let fp = StackFingerprint {
            modality: Some(Modality::Mr),
            mr_field_strength: Some(3.0),
            echo_time: Some(2.9),
            repetition_time: Some(2300.0),
            flip_angle: Some(9.0),
            ..Default::default()
        };
        let mut cache = SeriesClassificationCache::default();
        cache.set_review_reasons(vec![
            dcmforge_core::review::token("base", "missing"),
            dcmforge_core::review::token("technique", "missing"),
        ]);
        let mut stack = Stack {
            fingerprint: fp,
            cache,
            touched: false,
        };

        let reference_pool: Vec<ReferenceStack> = (0..3)
            .map(|_| ReferenceStack {
                fingerprint: StackFingerprint {
                    mr_field_strength: Some(3.0),
                    echo_time: Some(2.9),
                    repetition_time: Some(2300.0),
                    ..Default::default()
                },
                base: "T1w".to_string(),
                technique: "MPRAGE".to_string(),
            })
            .collect();

        let mut metrics = Step4Metrics::default();
        phase3_similarity_fill(&mut stack, &reference_pool, &mut metrics);

        assert_eq!(stack.cache.base.as_deref(), Some("T1w"));
        assert_eq!(stack.cache.technique.as_deref(), Some("MPRAGE"));
        assert_eq!(
            stack.cache.review_reasons(),
            vec![
                dcmforge_core::review::token("base", "low_confidence"),
                dcmforge_core::review::token("technique", "low_confidence"),
            ]
        );
        assert!(stack.touched);
        assert_eq!(metrics.base_technique_filled_by_similarity, 1);
    }

    /// Phase 3B: filling `base=SWI` re-runs the SWI branch rather than
    /// stopping at the physics-similarity guess, so construct/technique and
    /// provenance match what the branch would have produced at Step 3.
    #[test]
    fn phase3b_swi_fill_reinvokes_branch_and_sets_provenance() {
        let fp = StackFingerprint {
            modality: Some(Modality::Mr),
            mr_field_strength: Some(1.5),
            echo_time: Some(20.0),
            repetition_time: Some(27.0),
            parsed_image_type: vec!["is_minip".to_string()],
            ..Default::default()
        };
        let mut stack = Stack {
            fingerprint: fp,
            cache: SeriesClassificationCache::default(),
            touched: false,
        };

        let reference_pool: Vec<ReferenceStack> = (0..3)
            .map(|_| ReferenceStack {
                fingerprint: StackFingerprint {
                    mr_field_strength: Some(1.5),
                    echo_time: Some(20.0),
                    repetition_time: Some(27.0),
                    ..Default::default()
                },
                base: "SWI".to_string(),
                technique: "GRE".to_string(),
            })
            .collect();

        let mut metrics = Step4Metrics::default();
        phase3_similarity_fill(&mut stack, &reference_pool, &mut metrics);

        assert_eq!(stack.cache.base.as_deref(), Some("SWI"));
        assert_eq!(stack.cache.technique.as_deref(), Some("GRE"));
        assert_eq!(stack.cache.construct_csv, "MinIP");
        assert_eq!(stack.cache.provenance.as_deref(), Some("SWIRecon"));
        assert_eq!(stack.cache.directory_type, DirectoryType::Anat);
        assert_eq!(metrics.swi_rerouted, 1);
    }

    #[test]
    fn physics_key_widens_by_dropping_finer_bins_first() {
        let fp = StackFingerprint {
            mr_field_strength: Some(3.0),
            echo_time: Some(2.9),
            repetition_time: Some(2000.0),
            ..Default::default()
        };
        let exact = physics_key(&fp, 0);
        let dropped_repetition = physics_key(&fp, 1);
        let dropped_echo_too = physics_key(&fp, 2);
        assert!(exact.repetition_bin.is_some());
        assert!(dropped_repetition.repetition_bin.is_none());
        assert!(dropped_repetition.echo_bin.is_some());
        assert!(dropped_echo_too.echo_bin.is_none());
    }
}
