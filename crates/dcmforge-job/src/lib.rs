//! Job control shared by the extraction engine and the sorting pipeline.
//!
//! This crate owns the one cross-cutting mechanism the rest of the workspace
//! suspends on: [`JobControl::checkpoint`]. It does not talk to the network;
//! transport (SSE, polling, whatever) is an external collaborator.

mod control;
mod progress;

pub use control::{JobCancelled, JobControl};
pub use progress::{ProgressEvent, RollingLogBuffer, StepStatus, LOG_BUFFER_CAPACITY};
