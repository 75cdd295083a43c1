//! Test data factory: builds the named classification scenarios from
//! `dcmforge_core::pipeline`'s own unit tests, both as bare
//! [`StackFingerprint`]s for pure-classification tests and as
//! [`PendingInstance`] batches for full ingest-through-classify tests.
//!
//! Only scenarios whose detector-relevant fields survive the real ingest →
//! Step 2 reconstruction path (everything read off `parsed_image_type`,
//! which round-trips through `StackSignature::Mr::image_type`) are exposed
//! as instance batches; the others are fingerprint-only, matching the gap
//! noted in `DESIGN.md` for fields the signature doesn't carry.

use chrono::NaiveDate;
use dcmforge_core::entities::{Modality, StackFingerprint};
use dcmforge_core::signature::InstanceStackFields;
use dcmforge_store::PendingInstance;
use uuid::Uuid;

pub struct TestDataFactory;

impl TestDataFactory {
    /// Scenario (a): MPRAGE -> T1w anatomical. Fingerprint-only: the MPRAGE
    /// marker lives in `parsed_sequence_name`, a field Step 2 doesn't yet
    /// reconstruct from the persisted signature.
    pub fn mprage_fingerprint(series_stack_id: Uuid) -> StackFingerprint {
        StackFingerprint {
            series_stack_id,
            modality: Some(Modality::Mr),
            parsed_sequence_name: vec!["is_mprage".to_string()],
            ..Default::default()
        }
    }

    /// Scenario (c): SWI + MinIP reconstruction. Exposed as an instance
    /// batch too: both flags live in `parsed_image_type`, which survives the
    /// full ingest → Step 2 round trip via `InstanceStackFields::image_type`.
    pub fn swi_minip_fingerprint(series_stack_id: Uuid) -> StackFingerprint {
        StackFingerprint {
            series_stack_id,
            modality: Some(Modality::Mr),
            parsed_image_type: vec!["has_swi".to_string(), "is_minip".to_string()],
            ..Default::default()
        }
    }

    /// Scenario (e): ADC derived from a DTI reconstruction.
    pub fn adc_from_dti_fingerprint(series_stack_id: Uuid) -> StackFingerprint {
        StackFingerprint {
            series_stack_id,
            modality: Some(Modality::Mr),
            parsed_image_type: vec!["has_adc".to_string()],
            text_search_blob: "adc".to_string(),
            ..Default::default()
        }
    }

    /// One subject/study/series' worth of instances carrying the SWI/MinIP
    /// scenario's raw tags, ready for [`BulkWriter::write_batch`].
    pub fn swi_minip_instances(cohort_id: Uuid, subject_code: &str, n: usize) -> Vec<PendingInstance> {
        let study_date = NaiveDate::from_ymd_opt(2024, 3, 1);
        (0..n)
            .map(|i| PendingInstance {
                cohort_id,
                subject_code: subject_code.to_string(),
                study_instance_uid: format!("1.2.{subject_code}.study1"),
                study_date,
                series_instance_uid: format!("1.2.{subject_code}.series1"),
                modality: Modality::Mr,
                series_date: study_date,
                sop_instance_uid: format!("1.2.{subject_code}.series1.{i}"),
                dicom_file_path: format!("/data/{subject_code}/series1/{i}.dcm"),
                acquisition_date: study_date,
                content_date: study_date,
                stack_fields: InstanceStackFields {
                    image_type: vec!["has_swi".to_string(), "is_minip".to_string()],
                    image_orientation_patient: Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
                    ..Default::default()
                },
            })
            .collect()
    }

    /// A two-stack series (differing echo times) for exercising multi-stack
    /// fan-out in `stack_key` assignment: same subject/study/series, two
    /// distinct echo times split the instances into two stacks.
    pub fn dual_echo_instances(cohort_id: Uuid, subject_code: &str, per_echo: usize) -> Vec<PendingInstance> {
        let study_date = NaiveDate::from_ymd_opt(2024, 3, 1);
        let mut instances = Vec::with_capacity(per_echo * 2);
        for (echo_idx, echo_time) in [2.9, 80.0].into_iter().enumerate() {
            for i in 0..per_echo {
                instances.push(PendingInstance {
                    cohort_id,
                    subject_code: subject_code.to_string(),
                    study_instance_uid: format!("1.2.{subject_code}.study1"),
                    study_date,
                    series_instance_uid: format!("1.2.{subject_code}.series1"),
                    modality: Modality::Mr,
                    series_date: study_date,
                    sop_instance_uid: format!("1.2.{subject_code}.series1.{echo_idx}.{i}"),
                    dicom_file_path: format!("/data/{subject_code}/series1/{echo_idx}/{i}.dcm"),
                    acquisition_date: study_date,
                    content_date: study_date,
                    stack_fields: InstanceStackFields {
                        echo_time: Some(echo_time),
                        image_orientation_patient: Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
                        ..Default::default()
                    },
                });
            }
        }
        instances
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swi_minip_instances_carry_both_flags() {
        let instances = TestDataFactory::swi_minip_instances(Uuid::nil(), "SUBJ1", 3);
        assert_eq!(instances.len(), 3);
        for instance in &instances {
            assert!(instance.stack_fields.image_type.contains(&"has_swi".to_string()));
            assert!(instance.stack_fields.image_type.contains(&"is_minip".to_string()));
        }
    }

    #[test]
    fn dual_echo_instances_split_into_two_echo_times() {
        let instances = TestDataFactory::dual_echo_instances(Uuid::nil(), "SUBJ1", 2);
        assert_eq!(instances.len(), 4);
        let echo_times: std::collections::HashSet<_> = instances
            .iter()
            .map(|i| i.stack_fields.echo_time.unwrap().to_bits())
            .collect();
        assert_eq!(echo_times.len(), 2);
    }
}
