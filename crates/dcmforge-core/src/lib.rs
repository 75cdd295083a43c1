//! Entity model, semantic text normalizer, stack signature, the
//! evidence/confidence model, the YAML-driven detectors, classification
//! branches, and the classification pipeline (spec §3, §4.1-§4.6).
//!
//! This crate is pure and synchronous: no I/O, no DB, no async runtime. It
//! is the part of the workspace `dcmforge-store`/`dcmforge-sort` call into
//! for anything that only needs a `StackFingerprint` to produce a result.

pub mod branches;
pub mod config;
pub mod detectors;
pub mod entities;
pub mod evidence;
pub mod pipeline;
pub mod review;
pub mod signature;
pub mod text;

pub use pipeline::{Pipeline, PipelineOutcome};
