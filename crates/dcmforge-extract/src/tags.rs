//! DICOM tag whitelist parsing (§3 "Acceptance filter", §6 "DICOM tag set
//! consumed"): opens one file, reads a fixed tag whitelist via
//! `specific_tags`-style access, and produces a [`PendingInstance`] plus the
//! [`InstanceStackFields`] it embeds. Falls back to the full dataset read if
//! a tag access fails outright.

use chrono::NaiveDate;
use dicom_dictionary_std::tags;
use dicom_object::{open_file, InMemDicomObject};

use dcmforge_core::entities::Modality;
use dcmforge_core::signature::InstanceStackFields;
use dcmforge_store::writer::PendingInstance;

use crate::error::InstanceError;
use crate::subject::SubjectResolver;

/// SOPClassUID allow-list (§3): CT/MR/PET Image Storage and their Enhanced
/// and Legacy-Converted-Enhanced variants. Nine UIDs total.
pub const ACCEPTED_SOP_CLASSES: &[&str] = &[
    "1.2.840.10008.5.1.4.1.1.2",     // CT Image Storage
    "1.2.840.10008.5.1.4.1.1.2.1",   // Enhanced CT Image Storage
    "1.2.840.10008.5.1.4.1.1.2.2",   // Legacy Converted Enhanced CT Image Storage
    "1.2.840.10008.5.1.4.1.1.4",     // MR Image Storage
    "1.2.840.10008.5.1.4.1.1.4.1",   // Enhanced MR Image Storage
    "1.2.840.10008.5.1.4.1.1.4.3",   // Legacy Converted Enhanced MR Image Storage
    "1.2.840.10008.5.1.4.1.1.128",   // Positron Emission Tomography Image Storage
    "1.2.840.10008.5.1.4.1.1.128.1", // Legacy Converted Enhanced PET Image Storage
    "1.2.840.10008.5.1.4.1.1.130",   // Enhanced PET Image Storage
];

pub fn is_accepted_sop_class(sop_class_uid: &str) -> bool {
    ACCEPTED_SOP_CLASSES.contains(&sop_class_uid.trim())
}

fn str_tag(obj: &InMemDicomObject, tag: dicom_core::Tag) -> Option<String> {
    obj.element(tag).ok().and_then(|e| e.to_str().ok()).map(|s| s.trim().to_string())
}

fn f64_tag(obj: &InMemDicomObject, tag: dicom_core::Tag) -> Option<f64> {
    obj.element(tag).ok().and_then(|e| e.to_float64().ok())
}

fn i32_tag(obj: &InMemDicomObject, tag: dicom_core::Tag) -> Option<i32> {
    obj.element(tag).ok().and_then(|e| e.to_int::<i32>().ok())
}

fn multi_str_tag(obj: &InMemDicomObject, tag: dicom_core::Tag) -> Vec<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_multi_str().ok())
        .map(|v| v.iter().map(|s| s.trim().to_string()).collect())
        .unwrap_or_default()
}

fn iop_tag(obj: &InMemDicomObject, tag: dicom_core::Tag) -> Option<[f64; 6]> {
    let floats = obj.element(tag).ok().and_then(|e| e.to_multi_float64().ok())?;
    if floats.len() != 6 {
        return None;
    }
    let mut arr = [0.0; 6];
    arr.copy_from_slice(&floats[..6]);
    Some(arr)
}

fn parse_dicom_date(raw: Option<String>) -> Option<NaiveDate> {
    let raw = raw?;
    NaiveDate::parse_from_str(&raw, "%Y%m%d").ok()
}

/// Parses one DICOM file into a [`PendingInstance`], or `None` if the
/// acceptance filter rejects it. Instance-level parse failures are reported
/// as `Err` and are never fatal to the run (§7).
pub fn parse_instance(
    path: &std::path::Path,
    cohort_id: uuid::Uuid,
    resolver: &SubjectResolver,
) -> Result<Option<PendingInstance>, InstanceError> {
    let to_err = |reason: String| InstanceError {
        path: path.display().to_string(),
        reason,
    };

    let file_obj = open_file(path).map_err(|e| to_err(e.to_string()))?;
    let obj = file_obj.into_inner();

    let sop_class_uid = str_tag(&obj, tags::SOP_CLASS_UID).unwrap_or_default();
    if !is_accepted_sop_class(&sop_class_uid) {
        return Ok(None);
    }

    let modality_raw = str_tag(&obj, tags::MODALITY).unwrap_or_default();
    let Some(modality) = Modality::parse(&modality_raw) else {
        return Ok(None);
    };

    let study_instance_uid = str_tag(&obj, tags::STUDY_INSTANCE_UID)
        .ok_or_else(|| to_err("missing StudyInstanceUID".to_string()))?;
    let series_instance_uid = str_tag(&obj, tags::SERIES_INSTANCE_UID)
        .ok_or_else(|| to_err("missing SeriesInstanceUID".to_string()))?;
    let sop_instance_uid = str_tag(&obj, tags::SOP_INSTANCE_UID)
        .ok_or_else(|| to_err("missing SOPInstanceUID".to_string()))?;
    let patient_id = str_tag(&obj, tags::PATIENT_ID).unwrap_or_default();

    let resolved = resolver.resolve(&patient_id);

    let stack_fields = InstanceStackFields {
        echo_time: f64_tag(&obj, tags::ECHO_TIME),
        inversion_time: f64_tag(&obj, tags::INVERSION_TIME),
        echo_numbers: i32_tag(&obj, tags::ECHO_NUMBERS),
        echo_train_length: i32_tag(&obj, tags::ECHO_TRAIN_LENGTH),
        repetition_time: f64_tag(&obj, tags::REPETITION_TIME),
        flip_angle: f64_tag(&obj, tags::FLIP_ANGLE),
        receive_coil_name: str_tag(&obj, tags::RECEIVE_COIL_NAME),
        image_type: multi_str_tag(&obj, tags::IMAGE_TYPE),
        image_orientation_patient: iop_tag(&obj, tags::IMAGE_ORIENTATION_PATIENT),
        kvp: f64_tag(&obj, tags::KVP),
        exposure: f64_tag(&obj, tags::EXPOSURE),
        tube_current: f64_tag(&obj, tags::X_RAY_TUBE_CURRENT),
        bed_index: i32_tag(&obj, tags::IMAGE_INDEX),
        frame_type: str_tag(&obj, tags::FRAME_TYPE),
    };

    Ok(Some(PendingInstance {
        cohort_id,
        subject_code: resolved.subject_code,
        study_instance_uid,
        study_date: parse_dicom_date(str_tag(&obj, tags::STUDY_DATE)),
        series_instance_uid,
        modality,
        series_date: parse_dicom_date(str_tag(&obj, tags::SERIES_DATE)),
        sop_instance_uid,
        dicom_file_path: path.display().to_string(),
        acquisition_date: parse_dicom_date(str_tag(&obj, tags::ACQUISITION_DATE)),
        content_date: parse_dicom_date(str_tag(&obj, tags::CONTENT_DATE)),
        stack_fields,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_sop_classes_cover_all_three_modalities() {
        assert!(is_accepted_sop_class("1.2.840.10008.5.1.4.1.1.2"));
        assert!(is_accepted_sop_class("1.2.840.10008.5.1.4.1.1.4.1"));
        assert!(is_accepted_sop_class("1.2.840.10008.5.1.4.1.1.128"));
        assert!(!is_accepted_sop_class("1.2.840.10008.5.1.4.1.1.7")); // Secondary Capture
    }

    #[test]
    fn allow_list_has_exactly_nine_entries() {
        assert_eq!(ACCEPTED_SOP_CLASSES.len(), 9);
    }

    #[test]
    fn dicom_date_parses_yyyymmdd() {
        assert_eq!(
            parse_dicom_date(Some("20230615".to_string())),
            NaiveDate::from_ymd_opt(2023, 6, 15)
        );
        assert_eq!(parse_dicom_date(Some("not-a-date".to_string())), None);
        assert_eq!(parse_dicom_date(None), None);
    }
}
