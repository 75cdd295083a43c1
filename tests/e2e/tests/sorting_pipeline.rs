//! End-to-end integration test: real DICOM instances in, through
//! `BulkWriter`, through all four sorting steps, to a classified
//! `series_classification_cache` row out.
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

#[tokio::test]
async fn swi_minip_series_classifies_as_anat_through_full_pipeline() {
    let Some(db) = TestDatabaseManager::connect().await else {
        return;
    };
    db.truncate_all().await;

    let cohort_id = db.ensure_cohort("sorting-pipeline-swi", "/data/swi").await;
    let instances = TestDataFactory::swi_minip_instances(cohort_id, "SWI-SUBJ-1", 24);
    let report = db.write_instances(instances).await;
    assert_eq!(report.instances_inserted, 24);
    assert!(report.conflicts.is_empty());

    let control = JobControl::new("sorting-pipeline-swi-job");
    let handover = dcmforge_sort::run_full_pipeline(&db.pool, &control, step1_config(cohort_id))
        .await
        .expect("full pipeline run");

    assert_eq!(handover.series_stack_ids.len(), 1);
    let series_stack_id = handover.series_stack_ids[0];

    let client = db.pool.pool().get().await.expect("get connection");
    let row = client
        .query_one(
            "SELECT base, technique, directory_type FROM series_classification_cache WHERE series_stack_id = $1",
            &[&series_stack_id],
        )
        .await
        .expect("classification row exists");

    let base: Option<String> = row.get(0);
    let technique: Option<String> = row.get(1);
    let directory_type: String = row.get(2);

    assert_eq!(base.as_deref(), Some("SWI"));
    assert!(technique.is_some());
    assert_eq!(directory_type, "anat");
}

#[tokio::test]
async fn dual_echo_series_splits_into_two_stacks() {
    let Some(db) = TestDatabaseManager::connect().await else {
        return;
    };
    db.truncate_all().await;

    let cohort_id = db.ensure_cohort("sorting-pipeline-dual-echo", "/data/dual-echo").await;
    let instances = TestDataFactory::dual_echo_instances(cohort_id, "DE-SUBJ-1", 10);
    let report = db.write_instances(instances).await;
    assert_eq!(report.instances_inserted, 20);

    let control = JobControl::new("sorting-pipeline-dual-echo-job");
    let handover = dcmforge_sort::run_full_pipeline(&db.pool, &control, step1_config(cohort_id))
        .await
        .expect("full pipeline run");

    assert_eq!(handover.series_stack_ids.len(), 2);

    let client = db.pool.pool().get().await.expect("get connection");
    let rows = client
        .query(
            "SELECT stack_n_instances FROM series_stack WHERE id = ANY($1)",
            &[&handover.series_stack_ids],
        )
        .await
        .expect("stack rows exist");
    let counts: Vec<i64> = rows.iter().map(|r| r.get(0)).collect();
    assert_eq!(counts.iter().sum::<i64>(), 20);
    assert!(counts.iter().all(|&c| c == 10));
}

#[tokio::test]
async fn rerunning_pipeline_on_already_classified_series_is_a_noop() {
    let Some(db) = TestDatabaseManager::connect().await else {
        return;
    };
    db.truncate_all().await;

    let cohort_id = db.ensure_cohort("sorting-pipeline-idempotent", "/data/idempotent").await;
    let instances = TestDataFactory::swi_minip_instances(cohort_id, "IDEMP-SUBJ-1", 12);
    db.write_instances(instances).await;

    let control = JobControl::new("sorting-pipeline-idempotent-job");
    let first = dcmforge_sort::run_full_pipeline(&db.pool, &control, step1_config(cohort_id))
        .await
        .expect("first pipeline run");
    assert_eq!(first.series_stack_ids.len(), 1);

    let second = dcmforge_sort::run_full_pipeline(&db.pool, &control, step1_config(cohort_id))
        .await
        .expect("second pipeline run");
    assert!(
        second.series_stack_ids.is_empty(),
        "already-classified series must be excluded from a re-run's Step 1 scope"
    );
}
