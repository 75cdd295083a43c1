//! Cross-cutting invariant checks that hold after any sorting pipeline run,
//! independent of which scenario produced the data.
//!
//! Requires `DCMFORGE_TEST_DATABASE_URL`; skips (doesn't fail) otherwise.

use dcmforge_core::entities::Modality;
use dcmforge_e2e_tests::harness::TestDatabaseManager;
use dcmforge_e2e_tests::mocks::TestDataFactory;
use dcmforge_job::JobControl;
use dcmforge_sort::Step1Config;
use uuid::Uuid;

fn step1_config(cohort_id: Uuid) -> Step1Config {
    Step1Config {
        cohort_id,
        selected_modalities: vec![Modality::Mr, Modality::Ct, Modality::Pt],
        skip_classified: true,
    }
}

/// Every stack produced by the pipeline gets exactly one
/// `series_classification_cache` row: Step 4 writes once per stack inside a
/// single transaction, never partially.
#[tokio::test]
async fn every_classified_stack_has_exactly_one_cache_row() {
    let Some(db) = TestDatabaseManager::connect().await else {
        return;
    };
    db.truncate_all().await;

    let cohort_id = db.ensure_cohort("invariants-one-row-per-stack", "/data/one-row").await;
    let instances = TestDataFactory::swi_minip_instances(cohort_id, "INV-SUBJ-1", 16);
    db.write_instances(instances).await;

    let control = JobControl::new("invariants-one-row-job");
    let handover = dcmforge_sort::run_full_pipeline(&db.pool, &control, step1_config(cohort_id))
        .await
        .expect("pipeline run");

    let client = db.pool.pool().get().await.expect("get connection");
    let row = client
        .query_one(
            "SELECT count(*) FROM series_classification_cache WHERE series_stack_id = ANY($1)",
            &[&handover.series_stack_ids],
        )
        .await
        .expect("count query");
    let count: i64 = row.get(0);
    assert_eq!(count, handover.series_stack_ids.len() as i64);
}

/// Review reasons are always sorted and free of duplicate `axis:mode`
/// tokens, per `dcmforge_core::review`'s documented invariant.
#[tokio::test]
async fn review_reasons_stay_sorted_and_deduped() {
    let Some(db) = TestDatabaseManager::connect().await else {
        return;
    };
    db.truncate_all().await;

    let cohort_id = db.ensure_cohort("invariants-review-reasons", "/data/review-reasons").await;
    let instances = TestDataFactory::swi_minip_instances(cohort_id, "INV-SUBJ-2", 8);
    db.write_instances(instances).await;

    let control = JobControl::new("invariants-review-reasons-job");
    dcmforge_sort::run_full_pipeline(&db.pool, &control, step1_config(cohort_id))
        .await
        .expect("pipeline run");

    let client = db.pool.pool().get().await.expect("get connection");
    let rows = client
        .query("SELECT manual_review_reasons_csv FROM series_classification_cache", &[])
        .await
        .expect("select reasons");

    for row in &rows {
        let csv: String = row.get(0);
        let reasons = dcmforge_core::review::from_csv(&csv);
        let mut sorted = reasons.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(reasons, sorted, "reasons must already be sorted and deduped: {csv}");
    }
}

/// `orientation_confidence` always lands in `[0, 1]`, matching the
/// `stack_fingerprint` table's CHECK constraint and §4.2's definition as a
/// normalized magnitude ratio.
#[tokio::test]
async fn orientation_confidence_stays_in_unit_range() {
    let Some(db) = TestDatabaseManager::connect().await else {
        return;
    };
    db.truncate_all().await;

    let cohort_id = db.ensure_cohort("invariants-orientation-range", "/data/orientation").await;
    let instances = TestDataFactory::dual_echo_instances(cohort_id, "INV-SUBJ-3", 6);
    db.write_instances(instances).await;

    let control = JobControl::new("invariants-orientation-job");
    dcmforge_sort::run_full_pipeline(&db.pool, &control, step1_config(cohort_id))
        .await
        .expect("pipeline run");

    let client = db.pool.pool().get().await.expect("get connection");
    let rows = client
        .query("SELECT orientation_confidence FROM stack_fingerprint", &[])
        .await
        .expect("select confidences");
    assert!(!rows.is_empty());
    for row in &rows {
        let confidence: f64 = row.get(0);
        assert!((0.0..=1.0).contains(&confidence), "confidence {confidence} out of range");
    }
}

/// A second full-pipeline run over the same cohort, once every series is
/// already classified, must not alter any existing cache row: Step 1's
/// `skip_classified` gate keeps a re-run from ever re-entering Step 4.
#[tokio::test]
async fn rerun_does_not_mutate_existing_classification_rows() {
    let Some(db) = TestDatabaseManager::connect().await else {
        return;
    };
    db.truncate_all().await;

    let cohort_id = db.ensure_cohort("invariants-rerun-stable", "/data/rerun-stable").await;
    let instances = TestDataFactory::swi_minip_instances(cohort_id, "INV-SUBJ-4", 10);
    db.write_instances(instances).await;

    let control = JobControl::new("invariants-rerun-stable-job");
    dcmforge_sort::run_full_pipeline(&db.pool, &control, step1_config(cohort_id))
        .await
        .expect("first pipeline run");

    let client = db.pool.pool().get().await.expect("get connection");
    let before = client
        .query("SELECT series_stack_id, base, technique, directory_type FROM series_classification_cache ORDER BY series_stack_id", &[])
        .await
        .expect("select before");

    dcmforge_sort::run_full_pipeline(&db.pool, &control, step1_config(cohort_id))
        .await
        .expect("second pipeline run");

    let after = client
        .query("SELECT series_stack_id, base, technique, directory_type FROM series_classification_cache ORDER BY series_stack_id", &[])
        .await
        .expect("select after");

    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        let b_id: Uuid = b.get(0);
        let a_id: Uuid = a.get(0);
        let b_base: Option<String> = b.get(1);
        let a_base: Option<String> = a.get(1);
        assert_eq!(b_id, a_id);
        assert_eq!(b_base, a_base);
    }
}
