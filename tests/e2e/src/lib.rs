//! Shared harness and fixtures for the end-to-end integration test binaries
//! in `tests/`. Kept as a library target so `sorting_pipeline.rs` and
//! `invariants.rs` can both depend on the same database manager and test
//! data factory without duplicating setup code.

pub mod harness;
pub mod mocks;
