// Error types for the FECG extraction core
//
// This module defines the error taxonomy shared by every pipeline stage,
// with stable numeric codes so batch drivers can tabulate skipped recordings.

mod pipeline;

pub use pipeline::{log_pipeline_error, PipelineError, PipelineErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent reporting by callers that
/// aggregate results over many recordings.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
