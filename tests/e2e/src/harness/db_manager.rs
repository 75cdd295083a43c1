//! Test database manager.
//!
//! Provides an isolated Postgres-backed [`StorePool`] for integration tests,
//! gated behind the `DCMFORGE_TEST_DATABASE_URL` environment variable since
//! there's no embeddable RDBMS to spin up per test. Tests that need a
//! database call [`TestDatabaseManager::connect`] and skip (rather than
//! fail) when it returns `None`.

use chrono::NaiveDate;
use dcmforge_core::entities::{DuplicatePolicy, Modality};
use dcmforge_core::signature::InstanceStackFields;
use dcmforge_job::JobControl;
use dcmforge_store::{BulkWriter, PendingInstance, StorePool};
use uuid::Uuid;

/// Env var naming the Postgres URI to run integration tests against. Unset
/// by default so `cargo test` never requires a live database.
pub const TEST_DATABASE_URL_VAR: &str = "DCMFORGE_TEST_DATABASE_URL";

pub struct TestDatabaseManager {
    pub pool: StorePool,
}

impl TestDatabaseManager {
    /// Connects and migrates against `DCMFORGE_TEST_DATABASE_URL`. Returns
    /// `None` (after printing why) when the variable isn't set, so callers
    /// can skip gracefully instead of failing a test suite run without
    /// Postgres available.
    pub async fn connect() -> Option<Self> {
        let url = match std::env::var(TEST_DATABASE_URL_VAR) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "skipping: set {TEST_DATABASE_URL_VAR} to a Postgres URI to run this test"
                );
                return None;
            }
        };
        let pool = StorePool::connect(&url, 4).expect("connect to test database");
        pool.migrate().await.expect("run migrations");
        Some(Self { pool })
    }

    /// Creates a cohort row and returns its id. Cohort creation isn't part of
    /// `BulkWriter`'s scope (it always operates within one already-existing
    /// cohort), so tests create it directly.
    pub async fn ensure_cohort(&self, name: &str, raw_root: &str) -> Uuid {
        let client = self.pool.pool().get().await.expect("get connection");
        let id = Uuid::new_v4();
        let row = client
            .query_one(
                "INSERT INTO cohort (id, name, raw_root) VALUES ($1, $2, $3) \
                 ON CONFLICT (name) DO UPDATE SET raw_root = EXCLUDED.raw_root \
                 RETURNING id",
                &[&id, &name, &raw_root],
            )
            .await
            .expect("insert cohort");
        row.get(0)
    }

    /// Writes a batch of instances through the real `BulkWriter`, exercising
    /// the same five-phase entity merge production ingestion uses.
    pub async fn write_instances(&self, instances: Vec<PendingInstance>) -> dcmforge_store::BatchReport {
        let control = JobControl::new("test-ingest");
        let mut writer = BulkWriter::new(self.pool.clone(), control, DuplicatePolicy::Skip);
        writer.write_batch(instances).await.expect("write batch")
    }

    /// Truncates every table this crate writes to, for test isolation
    /// between cases sharing one database.
    pub async fn truncate_all(&self) {
        let client = self.pool.pool().get().await.expect("get connection");
        client
            .batch_execute(
                "TRUNCATE TABLE series_classification_cache, stack_fingerprint, \
                 mri_series_details, ct_series_details, pet_series_details, \
                 ingest_conflict, instance, series_stack, series, study, \
                 subject_other_identifiers, subject_cohorts, subject, cohort \
                 RESTART IDENTITY CASCADE",
            )
            .await
            .expect("truncate tables");
    }
}

/// Builds one [`PendingInstance`] with sane MR defaults, letting the caller
/// override the fields a given scenario actually varies.
pub struct InstanceBuilder {
    instance: PendingInstance,
}

impl InstanceBuilder {
    pub fn mr(cohort_id: Uuid, subject_code: &str, study_uid: &str, series_uid: &str, sop_uid: &str) -> Self {
        Self {
            instance: PendingInstance {
                cohort_id,
                subject_code: subject_code.to_string(),
                study_instance_uid: study_uid.to_string(),
                study_date: NaiveDate::from_ymd_opt(2024, 1, 15),
                series_instance_uid: series_uid.to_string(),
                modality: Modality::Mr,
                series_date: NaiveDate::from_ymd_opt(2024, 1, 15),
                sop_instance_uid: sop_uid.to_string(),
                dicom_file_path: format!("/data/{sop_uid}.dcm"),
                acquisition_date: NaiveDate::from_ymd_opt(2024, 1, 15),
                content_date: NaiveDate::from_ymd_opt(2024, 1, 15),
                stack_fields: InstanceStackFields::default(),
            },
        }
    }

    pub fn stack_fields(mut self, fields: InstanceStackFields) -> Self {
        self.instance.stack_fields = fields;
        self
    }

    pub fn study_date(mut self, date: Option<NaiveDate>) -> Self {
        self.instance.study_date = date;
        self.instance.series_date = date;
        self
    }

    pub fn build(self) -> PendingInstance {
        self.instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_builder_defaults_to_mr() {
        let instance = InstanceBuilder::mr(Uuid::nil(), "SUBJ1", "STUDY1", "SERIES1", "SOP1").build();
        assert_eq!(instance.modality, Modality::Mr);
        assert_eq!(instance.sop_instance_uid, "SOP1");
    }
}
