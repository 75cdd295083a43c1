//! Parallel extraction engine (§5/§6): directory scan, DICOM tag parsing,
//! subject resolution, resume index, adaptive batching, writer-pool routing.

pub mod batching;
pub mod engine;
pub mod error;
pub mod resume;
pub mod scanner;
pub mod subject;
pub mod tags;

pub use engine::{run, run_resumable, ExtractConfig, ExtractReport};
pub use error::{ExtractError, ExtractResult, InstanceError};
pub use resume::{ExistingPathIndex, ResumeIndex, UidWatermark};
