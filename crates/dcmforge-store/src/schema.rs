//! Schema migrations (§6 RDBMS schema contract).
//!
//! Mirrors the teacher's `Migration { version, description, up }` const-array
//! pattern, adapted to run against Postgres through an async client instead
//! of `rusqlite::Connection::execute_batch`.

use tokio_postgres::GenericClient;

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial schema: cohorts, subjects, studies, series, stacks, instances, detail tables, classification cache",
    up: MIGRATION_V1_UP,
}];

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS cohort (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    raw_root TEXT NOT NULL,
    UNIQUE (name)
);

CREATE TABLE IF NOT EXISTS id_type (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS subject (
    id UUID PRIMARY KEY,
    subject_code TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS subject_cohorts (
    subject_id UUID NOT NULL REFERENCES subject(id),
    cohort_id UUID NOT NULL REFERENCES cohort(id),
    PRIMARY KEY (subject_id, cohort_id)
);

CREATE TABLE IF NOT EXISTS subject_other_identifiers (
    subject_id UUID NOT NULL REFERENCES subject(id),
    id_type_id UUID NOT NULL REFERENCES id_type(id),
    value TEXT NOT NULL,
    PRIMARY KEY (subject_id, id_type_id)
);

CREATE TABLE IF NOT EXISTS study (
    id UUID PRIMARY KEY,
    study_instance_uid TEXT NOT NULL UNIQUE,
    subject_id UUID NOT NULL REFERENCES subject(id),
    study_date DATE
);
CREATE INDEX IF NOT EXISTS idx_study_subject ON study(subject_id);
CREATE INDEX IF NOT EXISTS idx_study_date_null ON study(id) WHERE study_date IS NULL;

CREATE TABLE IF NOT EXISTS series (
    id UUID PRIMARY KEY,
    series_instance_uid TEXT NOT NULL UNIQUE,
    study_id UUID NOT NULL REFERENCES study(id),
    modality TEXT NOT NULL CHECK (modality IN ('MR', 'CT', 'PT')),
    series_date DATE
);
CREATE INDEX IF NOT EXISTS idx_series_study ON series(study_id);
CREATE INDEX IF NOT EXISTS idx_series_modality ON series(modality);

CREATE TABLE IF NOT EXISTS series_stack (
    id UUID PRIMARY KEY,
    series_id UUID NOT NULL REFERENCES series(id),
    stack_index INTEGER NOT NULL CHECK (stack_index >= 0),
    stack_key TEXT,
    stack_orientation TEXT NOT NULL CHECK (stack_orientation IN ('axial', 'coronal', 'sagittal')),
    orientation_confidence DOUBLE PRECISION NOT NULL CHECK (orientation_confidence >= 0 AND orientation_confidence <= 1),
    stack_n_instances BIGINT NOT NULL DEFAULT 0,
    -- Serialized StackSignature (§4.2). Lets the writer reconstruct a
    -- series' existing stack signatures on a cache miss without a second
    -- join through the not-yet-materialized stack_fingerprint table.
    signature_json TEXT NOT NULL,
    UNIQUE (series_id, stack_index)
);
CREATE INDEX IF NOT EXISTS idx_stack_series ON series_stack(series_id);

CREATE TABLE IF NOT EXISTS instance (
    id UUID PRIMARY KEY,
    sop_instance_uid TEXT NOT NULL UNIQUE,
    series_id UUID NOT NULL REFERENCES series(id),
    series_stack_id UUID NOT NULL REFERENCES series_stack(id),
    dicom_file_path TEXT NOT NULL,
    acquisition_date DATE,
    content_date DATE
);
CREATE INDEX IF NOT EXISTS idx_instance_stack ON instance(series_stack_id);
CREATE INDEX IF NOT EXISTS idx_instance_series ON instance(series_id);

CREATE TABLE IF NOT EXISTS ingest_conflict (
    id BIGSERIAL PRIMARY KEY,
    cohort_id UUID NOT NULL REFERENCES cohort(id),
    scope TEXT NOT NULL CHECK (scope IN ('study', 'series', 'instance')),
    uid TEXT NOT NULL,
    detail TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (cohort_id, scope, uid, detail)
);

CREATE TABLE IF NOT EXISTS mri_series_details (
    series_id UUID PRIMARY KEY REFERENCES series(id),
    manufacturer TEXT,
    manufacturer_model_name TEXT,
    field_strength DOUBLE PRECISION,
    acquisition_type TEXT
);

CREATE TABLE IF NOT EXISTS ct_series_details (
    series_id UUID PRIMARY KEY REFERENCES series(id),
    manufacturer TEXT,
    manufacturer_model_name TEXT
);

CREATE TABLE IF NOT EXISTS pet_series_details (
    series_id UUID PRIMARY KEY REFERENCES series(id),
    manufacturer TEXT,
    manufacturer_model_name TEXT,
    radiopharmaceutical TEXT
);

CREATE TABLE IF NOT EXISTS stack_fingerprint (
    series_stack_id UUID PRIMARY KEY REFERENCES series_stack(id),
    series_id UUID NOT NULL REFERENCES series(id),
    study_id UUID NOT NULL REFERENCES study(id),
    subject_id UUID NOT NULL REFERENCES subject(id),
    cohort_id UUID NOT NULL REFERENCES cohort(id),
    modality TEXT,
    manufacturer TEXT,
    manufacturer_model_name TEXT,
    text_search_blob TEXT NOT NULL DEFAULT '',
    contrast_search_blob TEXT NOT NULL DEFAULT '',
    parsed_image_type TEXT[] NOT NULL DEFAULT '{}',
    parsed_scanning_sequence TEXT[] NOT NULL DEFAULT '{}',
    parsed_sequence_variant TEXT[] NOT NULL DEFAULT '{}',
    parsed_scan_options TEXT[] NOT NULL DEFAULT '{}',
    parsed_sequence_name TEXT[] NOT NULL DEFAULT '{}',
    repetition_time DOUBLE PRECISION,
    echo_time DOUBLE PRECISION,
    inversion_time DOUBLE PRECISION,
    flip_angle DOUBLE PRECISION,
    echo_train_length INTEGER,
    echo_numbers INTEGER,
    b_values DOUBLE PRECISION[] NOT NULL DEFAULT '{}',
    receive_coil_name TEXT,
    kvp DOUBLE PRECISION,
    exposure DOUBLE PRECISION,
    tube_current DOUBLE PRECISION,
    bed_index INTEGER,
    frame_type TEXT,
    field_of_view DOUBLE PRECISION,
    aspect_ratio DOUBLE PRECISION,
    slice_count INTEGER,
    image_orientation_patient DOUBLE PRECISION[],
    stack_orientation TEXT NOT NULL DEFAULT 'axial',
    orientation_confidence DOUBLE PRECISION NOT NULL DEFAULT 0,
    mr_field_strength DOUBLE PRECISION,
    mr_acquisition_type TEXT,
    contrast_bolus_agent_present BOOLEAN NOT NULL DEFAULT false
);
CREATE INDEX IF NOT EXISTS idx_fingerprint_series ON stack_fingerprint(series_id);
CREATE INDEX IF NOT EXISTS idx_fingerprint_modality ON stack_fingerprint(modality);

CREATE TABLE IF NOT EXISTS series_classification_cache (
    series_stack_id UUID PRIMARY KEY REFERENCES series_stack(id),
    base TEXT,
    technique TEXT,
    modifier_csv TEXT NOT NULL DEFAULT '',
    construct_csv TEXT NOT NULL DEFAULT '',
    provenance TEXT,
    acceleration_csv TEXT NOT NULL DEFAULT '',
    directory_type TEXT NOT NULL DEFAULT 'misc',
    post_contrast BOOLEAN,
    spinal_cord BOOLEAN,
    localizer BOOLEAN NOT NULL DEFAULT false,
    manual_review_required BOOLEAN NOT NULL DEFAULT false,
    manual_review_reasons_csv TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_cache_directory_type ON series_classification_cache(directory_type);
CREATE INDEX IF NOT EXISTS idx_cache_review ON series_classification_cache(manual_review_required) WHERE manual_review_required;

INSERT INTO schema_version (version) VALUES (1) ON CONFLICT (version) DO NOTHING;
"#;

pub async fn current_version<C: GenericClient>(client: &C) -> StoreResult<i32> {
    let row = client
        .query_opt(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version WHERE EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = 'schema_version')",
            &[],
        )
        .await;
    match row {
        Ok(Some(r)) => Ok(r.get(0)),
        Ok(None) => Ok(0),
        // schema_version itself doesn't exist yet: first run.
        Err(_) => Ok(0),
    }
}

pub async fn apply_migrations<C: GenericClient>(client: &C) -> StoreResult<u32> {
    let current = current_version(client).await?;
    let mut applied = 0;
    for migration in MIGRATIONS {
        if migration.version > current {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            client
                .batch_execute(migration.up)
                .await
                .map_err(|source| StoreError::Migration {
                    version: migration.version,
                    source,
                })?;
            applied += 1;
        }
    }
    Ok(applied)
}
