//! Resume index (§4.7 "Resume"): two independent strategies for skipping
//! already-ingested instances on a re-run.
//!
//! *By UID* ([`UidWatermark`]) records, per subject, the highest
//! SOPInstanceUID seen on a prior run and skips anything that compares
//! `<=` it — no DB load beyond one watermark row per subject, but only
//! sound when a subject's instances are produced in non-decreasing UID
//! order.
//!
//! *By path* ([`ExistingPathIndex`]) loads every `dicom_file_path` already
//! stored for the cohort and skips instances whose path is already
//! present. Small subjects get an exact `HashSet`; once a subject's
//! previously-seen set crosses [`BLOOM_THRESHOLD`], it's rebuilt as a Bloom
//! filter so memory stays bounded. A Bloom filter never false-negatives, so
//! "might already exist" only ever causes an extra (harmless)
//! `ON CONFLICT DO NOTHING`.

use std::collections::{HashMap, HashSet};

use bloomfilter::Bloom;

/// Subjects with more than this many previously-seen paths switch from an
/// exact set to a Bloom filter.
pub const BLOOM_THRESHOLD: usize = 50_000;
const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

enum SubjectIndex {
    Exact(HashSet<String>),
    Approximate(Bloom<String>),
}

impl SubjectIndex {
    fn contains(&self, value: &str) -> bool {
        match self {
            SubjectIndex::Exact(set) => set.contains(value),
            SubjectIndex::Approximate(bloom) => bloom.check(&value.to_string()),
        }
    }

    fn insert(&mut self, value: String) {
        match self {
            SubjectIndex::Exact(set) => {
                set.insert(value);
            }
            SubjectIndex::Approximate(bloom) => bloom.set(&value),
        }
    }

    fn len_hint(&self) -> usize {
        match self {
            SubjectIndex::Exact(set) => set.len(),
            SubjectIndex::Approximate(_) => usize::MAX,
        }
    }

    fn upgrade_if_needed(&mut self) {
        if let SubjectIndex::Exact(set) = self {
            if set.len() > BLOOM_THRESHOLD {
                let mut bloom = Bloom::new_for_fp_rate(set.len().max(1), BLOOM_FALSE_POSITIVE_RATE);
                for value in set.iter() {
                    bloom.set(value);
                }
                *self = SubjectIndex::Approximate(bloom);
            }
        }
    }
}

/// Resume mode (b): an index of every `dicom_file_path` already stored for
/// the cohort, seeded per subject from the RDBMS before extraction starts
/// on that subject.
#[derive(Default)]
pub struct ExistingPathIndex {
    per_subject: HashMap<String, SubjectIndex>,
}

impl ExistingPathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the index for one subject from `dicom_file_path` values
    /// already present in the RDBMS. Call once per subject before
    /// extraction begins on it.
    pub fn seed(&mut self, subject_code: &str, existing_paths: impl IntoIterator<Item = String>) {
        let mut index = SubjectIndex::Exact(HashSet::new());
        for path in existing_paths {
            index.insert(path);
        }
        index.upgrade_if_needed();
        self.per_subject.insert(subject_code.to_string(), index);
    }

    pub fn contains(&self, subject_code: &str, dicom_file_path: &str) -> bool {
        self.per_subject
            .get(subject_code)
            .is_some_and(|idx| idx.contains(dicom_file_path))
    }

    /// Records a newly-ingested path so later files in the same run are
    /// also recognized as already-seen (handles duplicate files within one
    /// scan).
    pub fn observe(&mut self, subject_code: &str, dicom_file_path: String) {
        let index = self
            .per_subject
            .entry(subject_code.to_string())
            .or_insert_with(|| SubjectIndex::Exact(HashSet::new()));
        index.insert(dicom_file_path);
        index.upgrade_if_needed();
    }

    pub fn is_approximate(&self, subject_code: &str) -> bool {
        matches!(self.per_subject.get(subject_code), Some(SubjectIndex::Approximate(_)))
    }

    #[cfg(test)]
    fn len_hint(&self, subject_code: &str) -> Option<usize> {
        self.per_subject.get(subject_code).map(SubjectIndex::len_hint)
    }
}

/// Resume mode (a): per-subject high-water mark on SOPInstanceUID. An
/// instance is resumed (skipped) when its SOPInstanceUID compares `<=` the
/// recorded watermark. DICOM UIDs are treated as opaque, monotonically
/// issued strings per subject, so the comparison is a plain lexicographic
/// one over the raw UID, not a numeric parse of the dot-separated
/// components.
#[derive(Default)]
pub struct UidWatermark {
    per_subject: HashMap<String, String>,
}

impl UidWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the watermark for one subject from the highest SOPInstanceUID
    /// recorded for it on a prior run.
    pub fn seed(&mut self, subject_code: &str, watermark: String) {
        self.per_subject.insert(subject_code.to_string(), watermark);
    }

    pub fn is_resumed(&self, subject_code: &str, sop_instance_uid: &str) -> bool {
        self.per_subject
            .get(subject_code)
            .is_some_and(|watermark| sop_instance_uid <= watermark.as_str())
    }

    /// Raises the watermark if this instance's UID is the highest seen so
    /// far for its subject this run.
    pub fn observe(&mut self, subject_code: &str, sop_instance_uid: &str) {
        match self.per_subject.get_mut(subject_code) {
            Some(watermark) => {
                if sop_instance_uid > watermark.as_str() {
                    watermark.clear();
                    watermark.push_str(sop_instance_uid);
                }
            }
            None => {
                self.per_subject.insert(subject_code.to_string(), sop_instance_uid.to_string());
            }
        }
    }
}

/// Which of the two resume strategies (§4.7), if any, a run uses. Engine
/// callers pick one per run; the two are never combined.
#[derive(Default)]
pub enum ResumeIndex {
    #[default]
    None,
    ByUid(UidWatermark),
    ByPath(ExistingPathIndex),
}

impl ResumeIndex {
    pub fn contains(&self, subject_code: &str, sop_instance_uid: &str, dicom_file_path: &str) -> bool {
        match self {
            ResumeIndex::None => false,
            ResumeIndex::ByUid(watermark) => watermark.is_resumed(subject_code, sop_instance_uid),
            ResumeIndex::ByPath(index) => index.contains(subject_code, dicom_file_path),
        }
    }

    pub fn observe(&mut self, subject_code: &str, sop_instance_uid: &str, dicom_file_path: &str) {
        match self {
            ResumeIndex::None => {}
            ResumeIndex::ByUid(watermark) => watermark.observe(subject_code, sop_instance_uid),
            ResumeIndex::ByPath(index) => index.observe(subject_code, dicom_file_path.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_set_contains_seeded_values() {
        let mut index = ExistingPathIndex::new();
        index.seed("sub-1", vec!["/data/a.dcm".to_string(), "/data/b.dcm".to_string()]);
        assert!(index.contains("sub-1", "/data/a.dcm"));
        assert!(!index.contains("sub-1", "/data/z.dcm"));
        assert!(!index.is_approximate("sub-1"));
    }

    #[test]
    fn exceeding_threshold_upgrades_to_bloom() {
        let mut index = ExistingPathIndex::new();
        let many = (0..BLOOM_THRESHOLD + 10).map(|i| format!("/data/{i}.dcm"));
        index.seed("sub-big", many);
        assert!(index.is_approximate("sub-big"));
        assert!(index.contains("sub-big", "/data/5.dcm"));
        assert_eq!(index.len_hint("sub-big"), Some(usize::MAX));
    }

    #[test]
    fn observe_after_seed_keeps_entry_found() {
        let mut index = ExistingPathIndex::new();
        index.seed("sub-1", vec![]);
        index.observe("sub-1", "/data/c.dcm".to_string());
        assert!(index.contains("sub-1", "/data/c.dcm"));
    }

    #[test]
    fn uid_watermark_skips_at_or_below() {
        let mut watermark = UidWatermark::new();
        watermark.seed("sub-1", "1.2.100".to_string());
        assert!(watermark.is_resumed("sub-1", "1.2.100"));
        assert!(watermark.is_resumed("sub-1", "1.2.050"));
        assert!(!watermark.is_resumed("sub-1", "1.2.200"));
        assert!(!watermark.is_resumed("sub-2", "1.2.001"));
    }

    #[test]
    fn uid_watermark_rises_to_highest_observed() {
        let mut watermark = UidWatermark::new();
        watermark.observe("sub-1", "1.2.050");
        watermark.observe("sub-1", "1.2.100");
        watermark.observe("sub-1", "1.2.010");
        assert!(watermark.is_resumed("sub-1", "1.2.100"));
        assert!(!watermark.is_resumed("sub-1", "1.2.101"));
    }

    #[test]
    fn resume_index_none_never_resumes() {
        let index = ResumeIndex::None;
        assert!(!index.contains("sub-1", "1.2.3", "/data/a.dcm"));
    }
}
