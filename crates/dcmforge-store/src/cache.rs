//! Writer in-memory caches, keyed by natural key (§4.8 "Cache hit").
//!
//! One [`WriterCaches`] lives per writer for the lifetime of a batch run.
//! Because writer-pool routing sends every batch for a subject through the
//! same writer (§5 "Writer-pool routing"), these maps never need
//! cross-writer locking.

use std::collections::HashMap;

use dcmforge_core::signature::StackSignature;
use uuid::Uuid;

/// `subject_code` → subject pk. The extractor folds `(patient_id, cohort)`
/// into `subject_code` via its deterministic hash before the writer ever
/// sees a payload, so that hash is this cache's natural key.
pub type SubjectKey = String;
/// StudyInstanceUID → (study pk, owning subject pk).
pub type StudyKey = String;
/// SeriesInstanceUID → (series pk, owning study pk).
pub type SeriesKey = String;

#[derive(Debug, Default)]
pub struct WriterCaches {
    pub subjects: HashMap<SubjectKey, Uuid>,
    pub studies: HashMap<StudyKey, (Uuid, Uuid)>,
    pub series: HashMap<SeriesKey, (Uuid, Uuid)>,
    /// `(series pk, signature)` → stack pk. Signatures are only comparable
    /// within a series, so the series pk is part of the key.
    pub stacks: HashMap<(Uuid, StackSignature), Uuid>,
    /// Next unused `stack_index` per series, advanced past any index
    /// observed in the DB (§4.8 "Stack reconciliation").
    pub next_stack_index: HashMap<Uuid, u32>,
}

impl WriterCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_stack_index(&mut self, series_id: Uuid) -> u32 {
        let next = self.next_stack_index.entry(series_id).or_insert(0);
        let idx = *next;
        *next += 1;
        idx
    }

    /// Advances the series' stack-index counter past `observed` if it isn't
    /// already ahead, so indices loaded from the DB are never reused.
    pub fn observe_stack_index(&mut self, series_id: Uuid, observed: u32) {
        let next = self.next_stack_index.entry(series_id).or_insert(0);
        if observed >= *next {
            *next = observed + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_dense_and_monotonic() {
        let mut caches = WriterCaches::new();
        let series_id = Uuid::nil();
        assert_eq!(caches.allocate_stack_index(series_id), 0);
        assert_eq!(caches.allocate_stack_index(series_id), 1);
        assert_eq!(caches.allocate_stack_index(series_id), 2);
    }

    #[test]
    fn observe_advances_past_db_index_without_rewinding() {
        let mut caches = WriterCaches::new();
        let series_id = Uuid::nil();
        caches.observe_stack_index(series_id, 5);
        assert_eq!(caches.allocate_stack_index(series_id), 6);

        caches.observe_stack_index(series_id, 2); // stale, must not rewind
        assert_eq!(caches.allocate_stack_index(series_id), 7);
    }
}
