//! Test and diagnostics harness utilities.
//!
//! Synthetic recordings with exact beat schedules let the pipeline be
//! exercised end to end without any dataset on disk. The diagnostic binary
//! and the integration tests both build on this module.

pub mod synthetic;

pub use synthetic::{generate, ComplexTrain, SyntheticRecording, SyntheticScenario};
