//! The relational entity model (spec §3): subjects → studies → series →
//! stacks → instances, plus the two derived per-stack rows the sorting
//! pipeline produces.
//!
//! These are plain data types. Persistence lives in `dcmforge-store`; this
//! crate only needs to know the shapes well enough to compute signatures,
//! fingerprints, and classification results over them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// DICOM modality, normalized to a single canonical value. PET may arrive
/// on the wire as `PT` or `PET`; both parse to [`Modality::Pt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    Mr,
    Ct,
    Pt,
}

impl Modality {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MR" => Some(Modality::Mr),
            "CT" => Some(Modality::Ct),
            "PT" | "PET" => Some(Modality::Pt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Mr => "MR",
            Modality::Ct => "CT",
            Modality::Pt => "PT",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavior on a duplicate SOPInstanceUID (§3 conflict policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    Skip,
    Overwrite,
    /// Treat as a new series. Not used in the core path (§3).
    AppendSeries,
}

/// Dominant imaging plane, derived from ImageOrientationPatient (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackOrientation {
    Axial,
    Coronal,
    Sagittal,
}

impl Default for StackOrientation {
    fn default() -> Self {
        StackOrientation::Axial
    }
}

/// BIDS-like intent / directory type (§4.6 stage 8, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryType {
    Anat,
    Dwi,
    Func,
    Fmap,
    Perf,
    Localizer,
    Misc,
    Excluded,
}

impl Default for DirectoryType {
    fn default() -> Self {
        DirectoryType::Misc
    }
}

impl DirectoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectoryType::Anat => "anat",
            DirectoryType::Dwi => "dwi",
            DirectoryType::Func => "func",
            DirectoryType::Fmap => "fmap",
            DirectoryType::Perf => "perf",
            DirectoryType::Localizer => "localizer",
            DirectoryType::Misc => "misc",
            DirectoryType::Excluded => "excluded",
        }
    }
}

/// Three-state flag: explicitly true/false, or undetermined.
pub type TriState = Option<bool>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cohort {
    pub id: Uuid,
    /// Unique by lowercased name.
    pub name: String,
    pub raw_root: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdType {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: Uuid,
    /// Deterministic hash of PatientID under a per-cohort seed.
    pub subject_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectOtherIdentifier {
    pub subject_id: Uuid,
    pub id_type_id: Uuid,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Study {
    pub id: Uuid,
    pub study_instance_uid: String,
    pub subject_id: Uuid,
    /// Imputed if missing at extraction time; study is excluded from sorting
    /// if unrecoverable (§4.9 step 3).
    pub study_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub id: Uuid,
    pub series_instance_uid: String,
    pub study_id: Uuid,
    pub modality: Modality,
}

/// A maximal subset of instances within a series sharing a grouping
/// signature (§3, §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStack {
    pub id: Uuid,
    pub series_id: Uuid,
    /// 0-based, dense within a series.
    pub stack_index: u32,
    /// Why a series split into multiple stacks, or `None` for single-stack
    /// series (§4.2).
    pub stack_key: Option<String>,
    pub stack_orientation: StackOrientation,
    pub orientation_confidence: f64,
    pub stack_n_instances: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub sop_instance_uid: String,
    pub series_id: Uuid,
    pub series_stack_id: Uuid,
    pub dicom_file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConflict {
    pub cohort_id: Uuid,
    /// `"study"` or `"series"` — the entity that was re-parented, or
    /// `"instance"` for a duplicate SOPInstanceUID outside resume mode.
    pub scope: String,
    pub uid: String,
    pub detail: String,
}

/// The flattened, normalized per-stack feature record consumed by
/// classification (§3, §4.4). Text fields have already passed through the
/// semantic normalizer (§4.1); physics/geometry fields are the rounded
/// stack-defining parameters plus everything the detectors read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackFingerprint {
    pub series_stack_id: Uuid,
    pub series_id: Uuid,
    pub study_id: Uuid,
    pub subject_id: Uuid,
    pub cohort_id: Uuid,
    pub modality: Option<Modality>,
    pub manufacturer: Option<String>,
    pub manufacturer_model_name: Option<String>,

    /// Normalized, deduplicated token stream from free-text DICOM fields.
    pub text_search_blob: String,
    /// Normalized token stream from contrast-agent related fields.
    pub contrast_search_blob: String,

    pub parsed_image_type: Vec<String>,
    pub parsed_scanning_sequence: Vec<String>,
    pub parsed_sequence_variant: Vec<String>,
    pub parsed_scan_options: Vec<String>,
    pub parsed_sequence_name: Vec<String>,

    // Physics
    pub repetition_time: Option<f64>,
    pub echo_time: Option<f64>,
    pub inversion_time: Option<f64>,
    pub flip_angle: Option<f64>,
    pub echo_train_length: Option<i32>,
    pub echo_numbers: Option<i32>,
    pub b_values: Vec<f64>,
    pub receive_coil_name: Option<String>,

    pub kvp: Option<f64>,
    pub exposure: Option<f64>,
    pub tube_current: Option<f64>,

    pub bed_index: Option<i32>,
    pub frame_type: Option<String>,

    // Geometry
    pub field_of_view: Option<f64>,
    pub aspect_ratio: Option<f64>,
    pub slice_count: Option<i32>,
    pub image_orientation_patient: Option<[f64; 6]>,
    pub stack_orientation: StackOrientation,
    pub orientation_confidence: f64,

    pub mr_field_strength: Option<f64>,
    pub mr_acquisition_type: Option<String>,

    pub contrast_bolus_agent_present: bool,
}

/// Sorted, comma-separated `axis:mode` review reasons (§4.3, §9).
pub type ReviewReasons = Vec<String>;

/// 1:1 with a stack; the output of the sorting pipeline (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesClassificationCache {
    pub series_stack_id: Uuid,

    pub base: Option<String>,
    pub technique: Option<String>,
    pub modifier_csv: String,
    pub construct_csv: String,
    pub provenance: Option<String>,
    pub acceleration_csv: String,

    pub directory_type: DirectoryType,

    pub post_contrast: TriState,
    pub spinal_cord: TriState,

    pub localizer: bool,
    pub manual_review_required: bool,

    pub manual_review_reasons_csv: String,
}

impl SeriesClassificationCache {
    /// Rebuild `manual_review_reasons_csv` and `manual_review_required` from
    /// a (possibly unsorted, possibly duplicated) reason list. See
    /// [`crate::review`] for the sort/dedup contract.
    pub fn set_review_reasons(&mut self, reasons: ReviewReasons) {
        let csv = crate::review::to_csv(reasons);
        self.manual_review_required = !csv.is_empty();
        self.manual_review_reasons_csv = csv;
    }

    pub fn review_reasons(&self) -> ReviewReasons {
        crate::review::from_csv(&self.manual_review_reasons_csv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modality_accepts_pt_and_pet() {
        assert_eq!(Modality::parse("PT"), Some(Modality::Pt));
        assert_eq!(Modality::parse("PET"), Some(Modality::Pt));
        assert_eq!(Modality::parse("pet"), Some(Modality::Pt));
        assert_eq!(Modality::parse("xr"), None);
    }
}
