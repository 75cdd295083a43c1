//! Step 1 Checkup (§4.9): resolves the cohort's scope for this sort run —
//! which studies have a usable `study_date`, which series survive the
//! modality/already-classified filters — before any fingerprint work begins.

use std::collections::HashSet;

use dcmforge_core::entities::Modality;
use dcmforge_job::JobControl;
use dcmforge_store::StorePool;
use tracing::warn;
use uuid::Uuid;

use crate::error::{SortError, SortResult};
use crate::handover::{Step1Handover, Step1Metrics, StepOutcome};

pub struct Step1Config {
    pub cohort_id: Uuid,
    pub selected_modalities: Vec<Modality>,
    /// Skip series whose stacks are already fully present in
    /// `series_classification_cache` (re-run mode).
    pub skip_classified: bool,
}

pub async fn run(pool: &StorePool, control: &JobControl, config: Step1Config) -> SortResult<StepOutcome<Step1Handover>> {
    control.checkpoint().await?;
    let mut metrics = Step1Metrics::default();

    let client = pool.pool().get().await?;

    let subject_rows = client
        .query(
            "SELECT subject_id FROM subject_cohorts WHERE cohort_id = $1",
            &[&config.cohort_id],
        )
        .await?;
    if subject_rows.is_empty() {
        return Err(SortError::EmptyScope("cohort has no subjects".to_string()));
    }
    let subject_ids: Vec<Uuid> = subject_rows.iter().map(|r| r.get(0)).collect();
    metrics.subjects_resolved = subject_ids.len();

    let study_rows = client
        .query(
            "SELECT id, study_date FROM study WHERE subject_id = ANY($1)",
            &[&subject_ids],
        )
        .await?;
    if study_rows.is_empty() {
        return Err(SortError::EmptyScope("cohort has no studies".to_string()));
    }
    metrics.studies_total = study_rows.len();

    control.checkpoint().await?;

    let mut surviving_study_ids: Vec<Uuid> = Vec::with_capacity(study_rows.len());
    for row in &study_rows {
        let study_id: Uuid = row.get(0);
        let study_date: Option<chrono::NaiveDate> = row.get(1);
        if study_date.is_some() {
            surviving_study_ids.push(study_id);
            continue;
        }

        match repair_study_date(&client, study_id).await? {
            Some(repaired) => {
                client
                    .execute("UPDATE study SET study_date = $1 WHERE id = $2", &[&repaired, &study_id])
                    .await?;
                metrics.study_dates_repaired += 1;
                surviving_study_ids.push(study_id);
            }
            None => {
                metrics.studies_excluded_null_date += 1;
            }
        }
    }

    if surviving_study_ids.is_empty() {
        return Err(SortError::EmptyScope(
            "no study in the cohort has a usable study_date".to_string(),
        ));
    }

    control.checkpoint().await?;

    let modality_strs: Vec<&'static str> = config.selected_modalities.iter().map(Modality::as_str).collect();
    let series_rows = client
        .query(
            "SELECT id FROM series WHERE study_id = ANY($1) AND modality = ANY($2)",
            &[&surviving_study_ids, &modality_strs],
        )
        .await?;
    let all_series_rows = client
        .query("SELECT id FROM series WHERE study_id = ANY($1)", &[&surviving_study_ids])
        .await?;
    metrics.series_total = all_series_rows.len();
    metrics.series_excluded_modality = metrics.series_total.saturating_sub(series_rows.len());

    let mut series_ids: Vec<Uuid> = series_rows.iter().map(|r| r.get(0)).collect();

    control.checkpoint().await?;

    if config.skip_classified && !series_ids.is_empty() {
        let unclassified_rows = client
            .query(
                "SELECT series.id FROM series \
                 JOIN series_stack ss ON ss.series_id = series.id \
                 LEFT JOIN series_classification_cache scc ON scc.series_stack_id = ss.id \
                 WHERE series.id = ANY($1) \
                 GROUP BY series.id \
                 HAVING bool_and(scc.series_stack_id IS NOT NULL) = false",
                &[&series_ids],
            )
            .await?;
        let unclassified: HashSet<Uuid> = unclassified_rows.iter().map(|r| r.get(0)).collect();
        let before = series_ids.len();
        series_ids.retain(|id| unclassified.contains(id));
        metrics.series_excluded_already_classified = before - series_ids.len();
    }

    metrics.series_selected = series_ids.len();

    let handover = Step1Handover { series_ids };

    if metrics.studies_excluded_null_date > 0 || metrics.series_excluded_already_classified > 0 {
        let message = format!(
            "checkup excluded {} studies (no usable date) and {} series (already classified); {} series selected",
            metrics.studies_excluded_null_date, metrics.series_excluded_already_classified, metrics.series_selected
        );
        warn!(%message);
        return Ok(StepOutcome::warning(
            handover,
            message,
            serde_json::to_value(&metrics).unwrap_or_default(),
        ));
    }

    if handover.series_ids.is_empty() {
        return Ok(StepOutcome::warning(
            handover,
            "no series matched the selected modalities".to_string(),
            serde_json::to_value(&metrics).unwrap_or_default(),
        ));
    }

    Ok(StepOutcome::complete(
        handover,
        format!("{} series selected for fingerprint materialization", metrics.series_selected),
        serde_json::to_value(&metrics).unwrap_or_default(),
    ))
}

/// Fills a missing `study_date`: first non-null of series_date, then
/// acquisition_date, then content_date, across the study's series/instances
/// (§4.9 step 2).
async fn repair_study_date(
    client: &deadpool_postgres::Client,
    study_id: Uuid,
) -> SortResult<Option<chrono::NaiveDate>> {
    if let Some(row) = client
        .query_opt(
            "SELECT series_date FROM series WHERE study_id = $1 AND series_date IS NOT NULL LIMIT 1",
            &[&study_id],
        )
        .await?
    {
        return Ok(Some(row.get(0)));
    }
    if let Some(row) = client
        .query_opt(
            "SELECT i.acquisition_date FROM instance i JOIN series s ON i.series_id = s.id \
             WHERE s.study_id = $1 AND i.acquisition_date IS NOT NULL LIMIT 1",
            &[&study_id],
        )
        .await?
    {
        return Ok(Some(row.get(0)));
    }
    if let Some(row) = client
        .query_opt(
            "SELECT i.content_date FROM instance i JOIN series s ON i.series_id = s.id \
             WHERE s.study_id = $1 AND i.content_date IS NOT NULL LIMIT 1",
            &[&study_id],
        )
        .await?
    {
        return Ok(Some(row.get(0)));
    }
    Ok(None)
}
