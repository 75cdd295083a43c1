//! Subject-code resolution (§3 Subject: "deterministic hash of PatientID
//! under a per-cohort seed"), with an optional CSV override map and an
//! optional typed other-identifier to attach alongside the resolved code.

use std::collections::HashMap;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{ExtractError, ExtractResult};

/// Deterministically hashes `patient_id` scoped to `cohort_seed` (the
/// cohort's raw-data root path, or an operator-supplied seed string) so the
/// same PatientID in different cohorts never collides on `subject_code`.
pub fn hash_subject_code(patient_id: &str, cohort_seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cohort_seed.as_bytes());
    hasher.update(b"\0");
    hasher.update(patient_id.trim().as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut s = String::with_capacity(chars);
    for byte in bytes {
        if s.len() >= chars {
            break;
        }
        s.push_str(&format!("{byte:02x}"));
    }
    s.truncate(chars);
    s
}

/// Optional `(raw_patient_id_or_folder -> subject_code)` override, loaded
/// from a two-column CSV (`source_id,subject_code`). When present, a row's
/// key wins outright over the deterministic hash.
#[derive(Debug, Clone, Default)]
pub struct SubjectCodeOverrides {
    map: HashMap<String, String>,
}

impl SubjectCodeOverrides {
    pub fn load(path: &Path) -> ExtractResult<Self> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| ExtractError::SubjectMap(e.to_string()))?;
        let mut map = HashMap::new();
        for record in reader.records() {
            let record = record.map_err(|e| ExtractError::SubjectMap(e.to_string()))?;
            let (Some(source_id), Some(subject_code)) = (record.get(0), record.get(1)) else {
                continue;
            };
            map.insert(source_id.trim().to_string(), subject_code.trim().to_string());
        }
        Ok(Self { map })
    }

    pub fn get(&self, source_id: &str) -> Option<&str> {
        self.map.get(source_id).map(String::as_str)
    }
}

pub struct SubjectResolver {
    cohort_seed: String,
    overrides: SubjectCodeOverrides,
    /// When set, every resolved subject also gets a `subject_other_identifiers`
    /// row of this id-type name carrying the raw PatientID (§3 Subject).
    other_identifier_type: Option<String>,
}

impl SubjectResolver {
    pub fn new(cohort_seed: impl Into<String>) -> Self {
        Self {
            cohort_seed: cohort_seed.into(),
            overrides: SubjectCodeOverrides::default(),
            other_identifier_type: None,
        }
    }

    pub fn with_overrides(mut self, overrides: SubjectCodeOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_other_identifier_type(mut self, id_type_name: impl Into<String>) -> Self {
        self.other_identifier_type = Some(id_type_name.into());
        self
    }

    pub fn resolve(&self, raw_patient_id: &str) -> ResolvedSubject {
        let subject_code = self
            .overrides
            .get(raw_patient_id)
            .map(str::to_string)
            .unwrap_or_else(|| hash_subject_code(raw_patient_id, &self.cohort_seed));

        ResolvedSubject {
            subject_code,
            other_identifier: self
                .other_identifier_type
                .clone()
                .map(|id_type| (id_type, raw_patient_id.to_string())),
        }
    }
}

pub struct ResolvedSubject {
    pub subject_code: String,
    /// `(id_type_name, value)`, present only when the resolver was
    /// configured to carry the raw PatientID through.
    pub other_identifier: Option<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_seed_scoped() {
        let a = hash_subject_code("12345", "cohort-a");
        let b = hash_subject_code("12345", "cohort-a");
        let c = hash_subject_code("12345", "cohort-b");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn override_wins_over_hash() {
        let mut overrides = SubjectCodeOverrides::default();
        overrides.map.insert("PAT001".to_string(), "sub-manual-001".to_string());
        let resolver = SubjectResolver::new("cohort-a").with_overrides(overrides);
        let resolved = resolver.resolve("PAT001");
        assert_eq!(resolved.subject_code, "sub-manual-001");
    }

    #[test]
    fn unmapped_id_falls_back_to_hash() {
        let resolver = SubjectResolver::new("cohort-a");
        let resolved = resolver.resolve("PAT002");
        assert_eq!(resolved.subject_code, hash_subject_code("PAT002", "cohort-a"));
    }
}
