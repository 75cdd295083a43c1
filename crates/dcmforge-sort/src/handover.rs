//! Shared value types passed between sorting steps (§4.9-§4.12).
//!
//! Each step function returns a `StepOutcome<T>`: the handover payload the
//! next step consumes, a [`StepStatus`], and a metrics blob that gets folded
//! into the step's [`dcmforge_job::ProgressEvent`] unchanged.

use std::collections::HashMap;

use dcmforge_job::StepStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The result of one sorting step: its payload for the next step, the status
/// to report (only ever `Complete` or `Warning` — hard failures are returned
/// as `Err(SortError)` instead), and a human-readable summary line.
#[derive(Debug, Clone)]
pub struct StepOutcome<T> {
    pub payload: T,
    pub status: StepStatus,
    pub message: String,
    pub metrics: serde_json::Value,
}

impl<T> StepOutcome<T> {
    pub fn complete(payload: T, message: impl Into<String>, metrics: serde_json::Value) -> Self {
        Self {
            payload,
            status: StepStatus::Complete,
            message: message.into(),
            metrics,
        }
    }

    pub fn warning(payload: T, message: impl Into<String>, metrics: serde_json::Value) -> Self {
        Self {
            payload,
            status: StepStatus::Warning,
            message: message.into(),
            metrics,
        }
    }
}

/// Step 1 Checkup's handover (§4.9): the series IDs that survive scope
/// resolution, carried forward into Step 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step1Handover {
    pub series_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step1Metrics {
    pub subjects_resolved: usize,
    pub studies_total: usize,
    pub studies_excluded_null_date: usize,
    pub study_dates_repaired: usize,
    pub series_total: usize,
    pub series_excluded_modality: usize,
    pub series_excluded_already_classified: usize,
    pub series_selected: usize,
}

/// Step 2 Fingerprint Materialization's handover (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step2Handover {
    pub series_stack_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step2Metrics {
    pub series_processed: usize,
    pub stacks_materialized: usize,
    pub stacks_instance_count_updated: usize,
    pub multi_stack_series: usize,
    pub stack_keys_assigned: usize,
    pub upsert_batches: usize,
    pub modality_breakdown: HashMap<String, usize>,
}

/// Step 3 Classification's handover (§4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step3Handover {
    pub series_stack_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step3Metrics {
    pub stacks_classified: usize,
    pub stacks_errored: usize,
    pub directory_type_histogram: HashMap<String, usize>,
    pub provenance_histogram: HashMap<String, usize>,
    pub manual_review_required: usize,
    pub upsert_chunks: usize,
}

/// Step 4 Completion's handover (§4.12) — terminal, nothing downstream
/// consumes it, but kept symmetric with the other steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step4Handover {
    pub series_stack_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step4Metrics {
    pub field_strength_normalized: usize,
    pub field_strength_assumed_gauss: usize,
    pub orientation_low_confidence_flagged: usize,
    pub acquisition_type_inferred: usize,
    pub base_technique_filled_by_similarity: usize,
    pub base_technique_expanded_bin_used: usize,
    pub swi_rerouted: usize,
    pub intent_resynthesized: usize,
    pub intent_unresolved: usize,
    pub contrast_duplicate_flagged: usize,
    pub manual_review_incremented: usize,
    pub base_histogram: HashMap<String, usize>,
    pub technique_histogram: HashMap<String, usize>,
}
