//! Extraction engine orchestration (§5 "Scheduling model"): a controller
//! owns an async event loop, a process-level worker pool (rayon, for DICOM
//! parsing), and a writer pool of 1..N [`BulkWriter`]s each on its own
//! async task. Subjects route to a writer deterministically by
//! `hash(subject_code) mod N`, sticky for the life of the run.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dcmforge_core::entities::DuplicatePolicy;
use dcmforge_job::JobControl;
use dcmforge_store::{BatchReport, BulkWriter, PendingInstance, StorePool};
use rayon::prelude::*;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::batching::AdaptiveBatchController;
use crate::error::{ExtractError, ExtractResult, InstanceError};
use crate::resume::ResumeIndex;
use crate::scanner::{scan, ExtensionMode, SubjectFolder};
use crate::subject::{SubjectCodeOverrides, SubjectResolver};
use crate::tags::parse_instance;

#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub cohort_id: Uuid,
    pub cohort_seed: String,
    pub root: PathBuf,
    pub extension_mode: ExtensionMode,
    pub duplicate_policy: DuplicatePolicy,
    pub writer_pool_size: usize,
    pub other_identifier_type: Option<String>,
    pub subject_code_overrides_path: Option<PathBuf>,
    pub initial_batch_size: usize,
    pub min_batch_size: usize,
    pub batch_target: Duration,
}

impl ExtractConfig {
    pub fn new(cohort_id: Uuid, cohort_seed: impl Into<String>, root: PathBuf) -> Self {
        Self {
            cohort_id,
            cohort_seed: cohort_seed.into(),
            root,
            extension_mode: ExtensionMode::CaseInsensitiveDcm,
            duplicate_policy: DuplicatePolicy::Skip,
            writer_pool_size: 4,
            other_identifier_type: None,
            subject_code_overrides_path: None,
            initial_batch_size: 2_000,
            min_batch_size: 100,
            batch_target: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub subjects_scanned: usize,
    pub instances_inserted: usize,
    pub instances_skipped: usize,
    pub instances_rejected_by_filter: usize,
    pub instance_errors: Vec<InstanceError>,
    pub conflicts: Vec<dcmforge_core::entities::IngestConflict>,
}

fn writer_index(subject_code: &str, pool_size: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    subject_code.hash(&mut hasher);
    (hasher.finish() as usize) % pool_size.max(1)
}

/// Parses every DICOM file in a subject folder in parallel, on rayon's
/// global thread pool (§5: "process-level workers"). Instance-level parse
/// failures are collected rather than propagated.
fn parse_subject_folder(
    folder: &SubjectFolder,
    cohort_id: Uuid,
    resolver: &SubjectResolver,
) -> (Vec<PendingInstance>, Vec<InstanceError>, usize) {
    let results: Vec<Result<Option<PendingInstance>, InstanceError>> = folder
        .files
        .par_iter()
        .map(|path| parse_instance(path, cohort_id, resolver))
        .collect();

    let mut instances = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    let mut rejected = 0usize;
    for result in results {
        match result {
            Ok(Some(instance)) => instances.push(instance),
            Ok(None) => rejected += 1,
            Err(e) => errors.push(e),
        }
    }
    (instances, errors, rejected)
}

pub async fn run(pool: StorePool, control: JobControl, config: ExtractConfig) -> ExtractResult<ExtractReport> {
    run_resumable(pool, control, config, &mut ResumeIndex::None).await
}

/// Same as [`run`], but checks each parsed instance against `resume_index`
/// first and skips it without a writer round-trip on a hit (§4.7 "Resume").
/// Callers seed [`ResumeIndex::ByUid`] from each subject's highest
/// previously-stored SOPInstanceUID, or [`ResumeIndex::ByPath`] from the
/// cohort's existing `dicom_file_path` values, before calling this.
pub async fn run_resumable(
    pool: StorePool,
    control: JobControl,
    config: ExtractConfig,
    resume_index: &mut ResumeIndex,
) -> ExtractResult<ExtractReport> {
    if !config.root.is_dir() {
        return Err(ExtractError::RootNotADirectory(config.root.display().to_string()));
    }

    let overrides = match &config.subject_code_overrides_path {
        Some(path) => SubjectCodeOverrides::load(path)?,
        None => SubjectCodeOverrides::default(),
    };
    let mut resolver = SubjectResolver::new(config.cohort_seed.clone()).with_overrides(overrides);
    if let Some(id_type) = &config.other_identifier_type {
        resolver = resolver.with_other_identifier_type(id_type.clone());
    }
    let resolver = Arc::new(resolver);

    let folders = scan(&config.root, config.extension_mode)?;

    let writer_pool_size = config.writer_pool_size.max(1);
    let mut writers: Vec<BulkWriter> = (0..writer_pool_size)
        .map(|_| BulkWriter::new(pool.clone(), control.clone(), config.duplicate_policy))
        .collect();
    let mut controllers: Vec<AdaptiveBatchController> = (0..writer_pool_size)
        .map(|_| AdaptiveBatchController::new(config.initial_batch_size, config.min_batch_size, config.batch_target))
        .collect();
    let mut pending: Vec<Vec<PendingInstance>> = (0..writer_pool_size).map(|_| Vec::new()).collect();

    let mut report = ExtractReport::default();

    for folder in &folders {
        control.checkpoint().await?;
        report.subjects_scanned += 1;

        let (instances, errors, rejected) = parse_subject_folder(folder, config.cohort_id, &resolver);
        report.instance_errors.extend(errors);
        report.instances_rejected_by_filter += rejected;

        for instance in instances {
            if resume_index.contains(&instance.subject_code, &instance.sop_instance_uid, &instance.dicom_file_path) {
                report.instances_skipped += 1;
                continue;
            }
            resume_index.observe(&instance.subject_code, &instance.sop_instance_uid, &instance.dicom_file_path);

            let idx = writer_index(&instance.subject_code, writer_pool_size);
            pending[idx].push(instance);

            if pending[idx].len() >= controllers[idx].batch_size() {
                flush_one(&mut writers[idx], &mut controllers[idx], &mut pending[idx], &mut report).await?;
            }
        }
    }

    for idx in 0..writer_pool_size {
        if !pending[idx].is_empty() {
            flush_one(&mut writers[idx], &mut controllers[idx], &mut pending[idx], &mut report).await?;
        }
    }

    debug!(
        subjects = report.subjects_scanned,
        inserted = report.instances_inserted,
        skipped = report.instances_skipped,
        errors = report.instance_errors.len(),
        "extraction run complete"
    );

    Ok(report)
}

async fn flush_one(
    writer: &mut BulkWriter,
    controller: &mut AdaptiveBatchController,
    pending: &mut Vec<PendingInstance>,
    report: &mut ExtractReport,
) -> ExtractResult<()> {
    let batch = std::mem::take(pending);
    let started = Instant::now();
    let result: BatchReport = writer.write_batch(batch).await?;
    controller.record_commit(started.elapsed());

    report.instances_inserted += result.instances_inserted;
    report.instances_skipped += result.instances_skipped;
    if !result.conflicts.is_empty() {
        warn!(count = result.conflicts.len(), "ingest conflicts recorded in batch");
    }
    report.conflicts.extend(result.conflicts);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_index_is_stable_for_same_subject() {
        let a = writer_index("sub-abc", 8);
        let b = writer_index("sub-abc", 8);
        assert_eq!(a, b);
        assert!(a < 8);
    }

    #[test]
    fn writer_index_never_exceeds_pool_size() {
        for i in 0..100 {
            let code = format!("sub-{i}");
            assert!(writer_index(&code, 5) < 5);
        }
    }
}
