//! The bulk writer (§4.8): five-phase entity merge, stack reconciliation,
//! parameter-budget-aware instance inserts, and per-batch modality detail
//! upserts.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use dcmforge_core::entities::{DuplicatePolicy, IngestConflict, Modality, StackOrientation};
use dcmforge_core::signature::{
    compute_ct_signature, compute_mr_signature, compute_pet_signature, InstanceStackFields,
    StackSignature,
};
use dcmforge_job::JobControl;
use tokio_postgres::Transaction;
use uuid::Uuid;

use crate::budget::{safe_rows, INSTANCE_COLUMNS, STACK_FK_COLUMNS};
use crate::cache::WriterCaches;
use crate::conflict;
use crate::error::StoreResult;
use crate::pool::StorePool;

/// One DICOM instance, fully resolved by extraction, ready to merge.
#[derive(Debug, Clone)]
pub struct PendingInstance {
    pub cohort_id: Uuid,
    /// Already folded `(patient_id, cohort)` hash (§3 Subject).
    pub subject_code: String,
    pub study_instance_uid: String,
    pub study_date: Option<NaiveDate>,
    pub series_instance_uid: String,
    pub modality: Modality,
    pub series_date: Option<NaiveDate>,
    pub sop_instance_uid: String,
    pub dicom_file_path: String,
    pub acquisition_date: Option<NaiveDate>,
    pub content_date: Option<NaiveDate>,
    pub stack_fields: InstanceStackFields,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub instances_inserted: usize,
    pub instances_skipped: usize,
    pub conflicts: Vec<IngestConflict>,
}

pub struct BulkWriter {
    pool: StorePool,
    control: JobControl,
    caches: WriterCaches,
    duplicate_policy: DuplicatePolicy,
}

impl BulkWriter {
    pub fn new(pool: StorePool, control: JobControl, duplicate_policy: DuplicatePolicy) -> Self {
        Self {
            pool,
            control,
            caches: WriterCaches::new(),
            duplicate_policy,
        }
    }

    /// Bind-parameter columns an instance insert row carries: the writer
    /// reports this back to the controller so adaptive batching (§5) never
    /// asks for more rows than one statement can hold.
    pub fn safe_instance_rows(&self) -> usize {
        safe_rows(INSTANCE_COLUMNS + STACK_FK_COLUMNS)
    }

    pub async fn write_batch(&mut self, batch: Vec<PendingInstance>) -> StoreResult<BatchReport> {
        self.control.checkpoint().await?;
        if batch.is_empty() {
            return Ok(BatchReport::default());
        }

        let mut client = self.pool.pool().get().await?;
        let tx = client.transaction().await?;

        let mut conflicts = Vec::new();

        let subject_pks = self.ensure_subjects(&tx, &batch).await?;
        self.control.checkpoint().await?;
        let study_pks = self
            .ensure_studies(&tx, &batch, &subject_pks, &mut conflicts)
            .await?;
        self.control.checkpoint().await?;
        let series_pks = self
            .ensure_series(&tx, &batch, &study_pks, &mut conflicts)
            .await?;
        self.control.checkpoint().await?;
        let stack_pks = self.ensure_stacks(&tx, &batch, &series_pks).await?;
        self.control.checkpoint().await?;

        let (inserted, skipped, instance_conflicts) = self
            .insert_instances(&tx, &batch, &series_pks, &stack_pks)
            .await?;
        conflicts.extend(instance_conflicts);

        conflict::record(&tx, &conflicts).await?;
        tx.commit().await?;

        self.control.checkpoint().await?;

        Ok(BatchReport {
            instances_inserted: inserted,
            instances_skipped: skipped,
            conflicts,
        })
    }

    /// Phase 1: ensure subjects. No parent to re-parent; the only concern is
    /// cache hit → bulk select → bulk insert → re-select stragglers, plus
    /// linking the subject to the batch's cohort(s).
    async fn ensure_subjects(
        &mut self,
        tx: &Transaction<'_>,
        batch: &[PendingInstance],
    ) -> StoreResult<HashMap<String, Uuid>> {
        let mut pks: HashMap<String, Uuid> = HashMap::new();
        let mut misses: HashSet<(String, Uuid)> = HashSet::new();

        for inst in batch {
            if let Some(pk) = self.caches.subjects.get(&inst.subject_code) {
                pks.insert(inst.subject_code.clone(), *pk);
            } else {
                misses.insert((inst.subject_code.clone(), inst.cohort_id));
            }
        }

        if misses.is_empty() {
            return Ok(pks);
        }

        let codes: Vec<String> = misses.iter().map(|(c, _)| c.clone()).collect();
        let rows = tx
            .query(
                "SELECT id, subject_code FROM subject WHERE subject_code = ANY($1)",
                &[&codes],
            )
            .await?;
        let mut found: HashSet<String> = HashSet::new();
        for row in &rows {
            let pk: Uuid = row.get(0);
            let code: String = row.get(1);
            found.insert(code.clone());
            pks.insert(code.clone(), pk);
            self.caches.subjects.insert(code, pk);
        }

        let to_insert: Vec<(String, Uuid)> = misses
            .iter()
            .filter(|(code, _)| !found.contains(code))
            .cloned()
            .collect();

        if !to_insert.is_empty() {
            let ids: Vec<Uuid> = to_insert.iter().map(|_| Uuid::new_v4()).collect();
            let codes: Vec<String> = to_insert.iter().map(|(c, _)| c.clone()).collect();
            let inserted = tx
                .query(
                    "INSERT INTO subject (id, subject_code) \
                     SELECT * FROM UNNEST($1::uuid[], $2::text[]) \
                     ON CONFLICT (subject_code) DO NOTHING \
                     RETURNING id, subject_code",
                    &[&ids, &codes],
                )
                .await?;
            let mut inserted_codes: HashSet<String> = HashSet::new();
            for row in &inserted {
                let pk: Uuid = row.get(0);
                let code: String = row.get(1);
                inserted_codes.insert(code.clone());
                pks.insert(code.clone(), pk);
                self.caches.subjects.insert(code, pk);
            }

            // Re-select stragglers: codes that lost the insert race.
            let stragglers: Vec<String> = codes
                .into_iter()
                .filter(|c| !inserted_codes.contains(c))
                .collect();
            if !stragglers.is_empty() {
                let rows = tx
                    .query(
                        "SELECT id, subject_code FROM subject WHERE subject_code = ANY($1)",
                        &[&stragglers],
                    )
                    .await?;
                for row in &rows {
                    let pk: Uuid = row.get(0);
                    let code: String = row.get(1);
                    pks.insert(code.clone(), pk);
                    self.caches.subjects.insert(code, pk);
                }
            }
        }

        // Link every resolved subject to its cohort (many-to-many, §3).
        for (code, cohort_id) in &misses {
            if let Some(pk) = pks.get(code) {
                tx.execute(
                    "INSERT INTO subject_cohorts (subject_id, cohort_id) VALUES ($1, $2) \
                     ON CONFLICT DO NOTHING",
                    &[pk, cohort_id],
                )
                .await?;
            }
        }

        Ok(pks)
    }

    /// Phase 2: ensure studies, with conflict re-parenting (§3 "Conflict
    /// policy"): an existing study linked to a different subject is
    /// re-parented to the subject seen in this batch.
    async fn ensure_studies(
        &mut self,
        tx: &Transaction<'_>,
        batch: &[PendingInstance],
        subject_pks: &HashMap<String, Uuid>,
        conflicts: &mut Vec<IngestConflict>,
    ) -> StoreResult<HashMap<String, Uuid>> {
        let mut pks: HashMap<String, Uuid> = HashMap::new();
        let mut misses: HashSet<String> = HashSet::new();

        for inst in batch {
            if let Some((pk, _)) = self.caches.studies.get(&inst.study_instance_uid) {
                pks.insert(inst.study_instance_uid.clone(), *pk);
            } else {
                misses.insert(inst.study_instance_uid.clone());
            }
        }

        if misses.is_empty() {
            return Ok(pks);
        }

        let uids: Vec<String> = misses.iter().cloned().collect();
        let rows = tx
            .query(
                "SELECT id, study_instance_uid, subject_id FROM study WHERE study_instance_uid = ANY($1)",
                &[&uids],
            )
            .await?;

        let mut found: HashSet<String> = HashSet::new();
        for row in &rows {
            let pk: Uuid = row.get(0);
            let uid: String = row.get(1);
            let existing_subject: Uuid = row.get(2);
            found.insert(uid.clone());

            let wanted_subject = batch
                .iter()
                .find(|i| i.study_instance_uid == uid)
                .and_then(|i| subject_pks.get(&i.subject_code))
                .copied();

            if let Some(wanted) = wanted_subject {
                if wanted != existing_subject {
                    tx.execute(
                        "UPDATE study SET subject_id = $1 WHERE id = $2",
                        &[&wanted, &pk],
                    )
                    .await?;
                    let cohort_id = batch
                        .iter()
                        .find(|i| i.study_instance_uid == uid)
                        .map(|i| i.cohort_id)
                        .unwrap_or_default();
                    conflicts.push(IngestConflict {
                        cohort_id,
                        scope: "study".to_string(),
                        uid: uid.clone(),
                        detail: format!(
                            "re-parented from subject {existing_subject} to {wanted}"
                        ),
                    });
                }
            }

            pks.insert(uid.clone(), pk);
            self.caches.studies.insert(uid, (pk, wanted_subject.unwrap_or(existing_subject)));
        }

        let mut dedup: HashMap<&str, &PendingInstance> = HashMap::new();
        for inst in batch {
            if misses.contains(&inst.study_instance_uid) && !found.contains(&inst.study_instance_uid) {
                dedup.entry(inst.study_instance_uid.as_str()).or_insert(inst);
            }
        }
        let to_insert: Vec<&PendingInstance> = dedup.into_values().collect();

        if !to_insert.is_empty() {
            let ids: Vec<Uuid> = to_insert.iter().map(|_| Uuid::new_v4()).collect();
            let uids: Vec<String> = to_insert.iter().map(|i| i.study_instance_uid.clone()).collect();
            let subjects: Vec<Uuid> = to_insert
                .iter()
                .map(|i| subject_pks.get(&i.subject_code).copied().unwrap_or_default())
                .collect();
            let dates: Vec<Option<NaiveDate>> = to_insert.iter().map(|i| i.study_date).collect();

            let inserted = tx
                .query(
                    "INSERT INTO study (id, study_instance_uid, subject_id, study_date) \
                     SELECT * FROM UNNEST($1::uuid[], $2::text[], $3::uuid[], $4::date[]) \
                     ON CONFLICT (study_instance_uid) DO NOTHING \
                     RETURNING id, study_instance_uid, subject_id",
                    &[&ids, &uids, &subjects, &dates],
                )
                .await?;

            let mut inserted_uids: HashSet<String> = HashSet::new();
            for row in &inserted {
                let pk: Uuid = row.get(0);
                let uid: String = row.get(1);
                let subject_id: Uuid = row.get(2);
                inserted_uids.insert(uid.clone());
                pks.insert(uid.clone(), pk);
                self.caches.studies.insert(uid, (pk, subject_id));
            }

            let stragglers: Vec<String> = uids
                .into_iter()
                .filter(|u| !inserted_uids.contains(u))
                .collect();
            if !stragglers.is_empty() {
                let rows = tx
                    .query(
                        "SELECT id, study_instance_uid, subject_id FROM study WHERE study_instance_uid = ANY($1)",
                        &[&stragglers],
                    )
                    .await?;
                for row in &rows {
                    let pk: Uuid = row.get(0);
                    let uid: String = row.get(1);
                    let subject_id: Uuid = row.get(2);
                    pks.insert(uid.clone(), pk);
                    self.caches.studies.insert(uid, (pk, subject_id));
                }
            }
        }

        Ok(pks)
    }

    /// Phase 3: ensure series, same shape as studies but parented to study.
    async fn ensure_series(
        &mut self,
        tx: &Transaction<'_>,
        batch: &[PendingInstance],
        study_pks: &HashMap<String, Uuid>,
        conflicts: &mut Vec<IngestConflict>,
    ) -> StoreResult<HashMap<String, Uuid>> {
        let mut pks: HashMap<String, Uuid> = HashMap::new();
        let mut misses: HashSet<String> = HashSet::new();

        for inst in batch {
            if let Some((pk, _)) = self.caches.series.get(&inst.series_instance_uid) {
                pks.insert(inst.series_instance_uid.clone(), *pk);
            } else {
                misses.insert(inst.series_instance_uid.clone());
            }
        }

        if misses.is_empty() {
            return Ok(pks);
        }

        let uids: Vec<String> = misses.iter().cloned().collect();
        let rows = tx
            .query(
                "SELECT id, series_instance_uid, study_id FROM series WHERE series_instance_uid = ANY($1)",
                &[&uids],
            )
            .await?;

        let mut found: HashSet<String> = HashSet::new();
        for row in &rows {
            let pk: Uuid = row.get(0);
            let uid: String = row.get(1);
            let existing_study: Uuid = row.get(2);
            found.insert(uid.clone());

            let inst = batch.iter().find(|i| i.series_instance_uid == uid);
            let wanted_study = inst.and_then(|i| study_pks.get(&i.study_instance_uid)).copied();

            if let Some(wanted) = wanted_study {
                if wanted != existing_study {
                    tx.execute(
                        "UPDATE series SET study_id = $1 WHERE id = $2",
                        &[&wanted, &pk],
                    )
                    .await?;
                    conflicts.push(IngestConflict {
                        cohort_id: inst.map(|i| i.cohort_id).unwrap_or_default(),
                        scope: "series".to_string(),
                        uid: uid.clone(),
                        detail: format!("re-parented from study {existing_study} to {wanted}"),
                    });
                }
            }

            pks.insert(uid.clone(), pk);
            self.caches
                .series
                .insert(uid, (pk, wanted_study.unwrap_or(existing_study)));
        }

        let mut dedup: HashMap<&str, &PendingInstance> = HashMap::new();
        for inst in batch {
            if misses.contains(&inst.series_instance_uid) && !found.contains(&inst.series_instance_uid) {
                dedup.entry(inst.series_instance_uid.as_str()).or_insert(inst);
            }
        }
        let to_insert: Vec<&PendingInstance> = dedup.into_values().collect();

        if !to_insert.is_empty() {
            let ids: Vec<Uuid> = to_insert.iter().map(|_| Uuid::new_v4()).collect();
            let uids: Vec<String> = to_insert.iter().map(|i| i.series_instance_uid.clone()).collect();
            let studies: Vec<Uuid> = to_insert
                .iter()
                .map(|i| study_pks.get(&i.study_instance_uid).copied().unwrap_or_default())
                .collect();
            let modalities: Vec<&'static str> = to_insert.iter().map(|i| i.modality.as_str()).collect();
            let dates: Vec<Option<NaiveDate>> = to_insert.iter().map(|i| i.series_date).collect();

            let inserted = tx
                .query(
                    "INSERT INTO series (id, series_instance_uid, study_id, modality, series_date) \
                     SELECT * FROM UNNEST($1::uuid[], $2::text[], $3::uuid[], $4::text[], $5::date[]) \
                     ON CONFLICT (series_instance_uid) DO NOTHING \
                     RETURNING id, series_instance_uid, study_id",
                    &[&ids, &uids, &studies, &modalities, &dates],
                )
                .await?;

            let mut inserted_uids: HashSet<String> = HashSet::new();
            for row in &inserted {
                let pk: Uuid = row.get(0);
                let uid: String = row.get(1);
                let study_id: Uuid = row.get(2);
                inserted_uids.insert(uid.clone());
                pks.insert(uid.clone(), pk);
                self.caches.series.insert(uid, (pk, study_id));
            }

            let stragglers: Vec<String> = uids.into_iter().filter(|u| !inserted_uids.contains(u)).collect();
            if !stragglers.is_empty() {
                let rows = tx
                    .query(
                        "SELECT id, series_instance_uid, study_id FROM series WHERE series_instance_uid = ANY($1)",
                        &[&stragglers],
                    )
                    .await?;
                for row in &rows {
                    let pk: Uuid = row.get(0);
                    let uid: String = row.get(1);
                    let study_id: Uuid = row.get(2);
                    pks.insert(uid.clone(), pk);
                    self.caches.series.insert(uid, (pk, study_id));
                }
            }
        }

        Ok(pks)
    }

    /// Phase 4: ensure stacks. On a cache miss, loads every existing stack
    /// of the implicated series and reconstructs its signature from
    /// `signature_json` before deciding whether a new stack is needed
    /// (§4.8 "Stack reconciliation").
    async fn ensure_stacks(
        &mut self,
        tx: &Transaction<'_>,
        batch: &[PendingInstance],
        series_pks: &HashMap<String, Uuid>,
    ) -> StoreResult<HashMap<(Uuid, StackSignature), Uuid>> {
        let mut pks: HashMap<(Uuid, StackSignature), Uuid> = HashMap::new();
        let mut series_to_reload: HashSet<Uuid> = HashSet::new();

        let mut wanted: Vec<(Uuid, StackSignature)> = Vec::new();
        for inst in batch {
            let Some(&series_id) = series_pks.get(&inst.series_instance_uid) else {
                continue;
            };
            let signature = compute_signature(inst.modality, &inst.stack_fields);
            let key = (series_id, signature);
            if !self.caches.stacks.contains_key(&key) {
                series_to_reload.insert(series_id);
            }
            wanted.push(key);
        }

        for series_id in &series_to_reload {
            let rows = tx
                .query(
                    "SELECT id, stack_index, signature_json FROM series_stack WHERE series_id = $1",
                    &[series_id],
                )
                .await?;
            for row in &rows {
                let pk: Uuid = row.get(0);
                let stack_index: i32 = row.get(1);
                let signature_json: String = row.get(2);
                if let Ok(signature) = serde_json::from_str::<StackSignature>(&signature_json) {
                    self.caches.stacks.insert((*series_id, signature), pk);
                }
                self.caches.observe_stack_index(*series_id, stack_index as u32);
            }
        }

        for key in &wanted {
            if let Some(pk) = self.caches.stacks.get(key) {
                pks.insert(key.clone(), *pk);
            }
        }

        let mut to_create: Vec<(Uuid, StackSignature)> = wanted
            .into_iter()
            .filter(|k| !pks.contains_key(k))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        to_create.sort_by(|a, b| a.0.cmp(&b.0));

        for (series_id, signature) in to_create {
            let stack_index = self.caches.allocate_stack_index(series_id);
            let (orientation, confidence) = orientation_of(&signature);
            let id = Uuid::new_v4();
            let signature_json = serde_json::to_string(&signature).unwrap_or_default();
            let inserted = tx
                .query_opt(
                    "INSERT INTO series_stack \
                     (id, series_id, stack_index, stack_key, stack_orientation, orientation_confidence, stack_n_instances, signature_json) \
                     VALUES ($1, $2, $3, NULL, $4, $5, 0, $6) \
                     ON CONFLICT (series_id, stack_index) DO NOTHING \
                     RETURNING id",
                    &[
                        &id,
                        &series_id,
                        &(stack_index as i32),
                        &orientation_str(orientation),
                        &confidence,
                        &signature_json,
                    ],
                )
                .await?;
            let pk = match inserted {
                Some(row) => row.get(0),
                // Lost the insert race at this index: another writer (or an
                // earlier phase in this same batch) claimed it first.
                None => {
                    let row = tx
                        .query_one(
                            "SELECT id FROM series_stack WHERE series_id = $1 AND stack_index = $2",
                            &[&series_id, &(stack_index as i32)],
                        )
                        .await?;
                    row.get(0)
                }
            };
            self.caches.stacks.insert((series_id, signature.clone()), pk);
            pks.insert((series_id, signature), pk);
        }

        Ok(pks)
    }

    /// Phase 5: insert instances, honoring the duplicate policy and the
    /// parameter budget (§4.8 "Parameter budget" / "Duplicate policy").
    async fn insert_instances(
        &self,
        tx: &Transaction<'_>,
        batch: &[PendingInstance],
        series_pks: &HashMap<String, Uuid>,
        stack_pks: &HashMap<(Uuid, StackSignature), Uuid>,
    ) -> StoreResult<(usize, usize, Vec<IngestConflict>)> {
        let chunk_size = self.safe_instance_rows();
        let mut inserted_total = 0usize;
        let mut skipped_total = 0usize;
        let mut conflicts = Vec::new();

        for chunk in batch.chunks(chunk_size) {
            let mut ids = Vec::with_capacity(chunk.len());
            let mut sops = Vec::with_capacity(chunk.len());
            let mut series_ids = Vec::with_capacity(chunk.len());
            let mut stack_ids = Vec::with_capacity(chunk.len());
            let mut paths = Vec::with_capacity(chunk.len());

            for inst in chunk {
                let Some(&series_id) = series_pks.get(&inst.series_instance_uid) else {
                    continue;
                };
                let signature = compute_signature(inst.modality, &inst.stack_fields);
                let Some(&stack_id) = stack_pks.get(&(series_id, signature)) else {
                    continue;
                };
                ids.push(Uuid::new_v4());
                sops.push(inst.sop_instance_uid.clone());
                series_ids.push(series_id);
                stack_ids.push(stack_id);
                paths.push(inst.dicom_file_path.clone());
            }

            if ids.is_empty() {
                continue;
            }

            let query = match self.duplicate_policy {
                DuplicatePolicy::Overwrite => {
                    "INSERT INTO instance (id, sop_instance_uid, series_id, series_stack_id, dicom_file_path) \
                     SELECT * FROM UNNEST($1::uuid[], $2::text[], $3::uuid[], $4::uuid[], $5::text[]) \
                     ON CONFLICT (sop_instance_uid) DO UPDATE SET \
                        series_id = EXCLUDED.series_id, \
                        series_stack_id = EXCLUDED.series_stack_id, \
                        dicom_file_path = EXCLUDED.dicom_file_path \
                     RETURNING sop_instance_uid"
                }
                DuplicatePolicy::Skip | DuplicatePolicy::AppendSeries => {
                    "INSERT INTO instance (id, sop_instance_uid, series_id, series_stack_id, dicom_file_path) \
                     SELECT * FROM UNNEST($1::uuid[], $2::text[], $3::uuid[], $4::uuid[], $5::text[]) \
                     ON CONFLICT (sop_instance_uid) DO NOTHING \
                     RETURNING sop_instance_uid"
                }
            };

            let rows = tx
                .query(query, &[&ids, &sops, &series_ids, &stack_ids, &paths])
                .await?;
            let accepted: HashSet<String> = rows.iter().map(|r| r.get(0)).collect();

            inserted_total += accepted.len();
            let rejected: Vec<&String> = sops.iter().filter(|s| !accepted.contains(*s)).collect();
            skipped_total += rejected.len();

            if self.duplicate_policy == DuplicatePolicy::Skip {
                for sop in rejected {
                    let inst = chunk.iter().find(|i| &i.sop_instance_uid == sop);
                    conflicts.push(IngestConflict {
                        cohort_id: inst.map(|i| i.cohort_id).unwrap_or_default(),
                        scope: "instance".to_string(),
                        uid: sop.clone(),
                        detail: "duplicate SOPInstanceUID skipped".to_string(),
                    });
                }
            }
        }

        Ok((inserted_total, skipped_total, conflicts))
    }
}

fn compute_signature(modality: Modality, fields: &InstanceStackFields) -> StackSignature {
    match modality {
        Modality::Mr => compute_mr_signature(fields),
        Modality::Ct => compute_ct_signature(fields),
        Modality::Pt => compute_pet_signature(fields),
    }
}

fn orientation_of(signature: &StackSignature) -> (StackOrientation, f64) {
    // The signature only carries the categorized orientation, not the raw
    // confidence (which isn't part of stack membership); callers that need
    // the true confidence value pass it through the fingerprint instead.
    // Reconstructing it as 1.0 here is a placeholder overwritten by Step 2
    // fingerprint materialization, which owns `orientation_confidence`.
    let orientation = match signature {
        StackSignature::Mr { orientation, .. }
        | StackSignature::Ct { orientation, .. }
        | StackSignature::Pet { orientation, .. } => orientation.0,
    };
    (orientation, 1.0)
}

fn orientation_str(orientation: StackOrientation) -> &'static str {
    match orientation {
        StackOrientation::Axial => "axial",
        StackOrientation::Coronal => "coronal",
        StackOrientation::Sagittal => "sagittal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_dispatch_matches_modality() {
        let fields = InstanceStackFields {
            kvp: Some(120.0),
            ..Default::default()
        };
        let sig = compute_signature(Modality::Ct, &fields);
        assert!(matches!(sig, StackSignature::Ct { .. }));
    }

    #[test]
    fn safe_instance_rows_is_nonzero() {
        let pool_stub_rows = safe_rows(INSTANCE_COLUMNS + STACK_FK_COLUMNS);
        assert!(pool_stub_rows > 0);
    }

    #[test]
    fn orientation_str_round_trips_all_variants() {
        assert_eq!(orientation_str(StackOrientation::Axial), "axial");
        assert_eq!(orientation_str(StackOrientation::Coronal), "coronal");
        assert_eq!(orientation_str(StackOrientation::Sagittal), "sagittal");
    }
}
