// Pipeline error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Pipeline error code constants
///
/// Error code range: 3001-3008
pub struct PipelineErrorCodes {}

impl PipelineErrorCodes {
    /// Input shorter than the minimum filter/window requirement
    pub const INSUFFICIENT_LENGTH: i32 = 3001;

    /// Channels of one recording have differing lengths
    pub const MISMATCHED_CHANNEL_LENGTH: i32 = 3002;

    /// Channel with zero variance
    pub const DEGENERATE_CHANNEL: i32 = 3003;

    /// Recording violates a construction invariant
    pub const INVALID_RECORDING: i32 = 3004;

    /// Configuration value outside its domain
    pub const INVALID_CONFIG: i32 = 3005;

    /// Peak index outside the signal
    pub const INVALID_PEAKS: i32 = 3006;

    /// Per-channel input count does not match the channel count
    pub const CHANNEL_COUNT_MISMATCH: i32 = 3007;

    /// No channels supplied
    pub const EMPTY_INPUT: i32 = 3008;
}

/// Log a pipeline error with structured context
///
/// Logs the numeric code, the failing component and the message at error
/// level. Never panics.
pub fn log_pipeline_error(err: &PipelineError, context: &str) {
    error!(
        "Pipeline error in {}: code={}, component=FecgPipeline, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Pipeline-related errors
///
/// Every stage returns these as explicit values; no stage retries.
///
/// Error code ranges: 3001-3008
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Input shorter than the minimum filter or window requirement
    InsufficientLength { required: usize, actual: usize },

    /// A channel's length differs from the first channel's
    MismatchedChannelLength {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    /// Channel carries no usable variance (constant or all-zero)
    DegenerateChannel { channel: usize },

    /// Recording violates a construction invariant
    InvalidRecording { reason: String },

    /// Configuration value outside its domain
    InvalidConfig { reason: String },

    /// A peak index falls outside the signal
    InvalidPeaks { reason: String },

    /// Labels or per-channel inputs do not match the channel count
    ChannelCountMismatch { expected: usize, actual: usize },

    /// No channels supplied
    EmptyInput,
}

impl PipelineError {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        PipelineError::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_recording(reason: impl Into<String>) -> Self {
        PipelineError::InvalidRecording {
            reason: reason.into(),
        }
    }
}

impl ErrorCode for PipelineError {
    fn code(&self) -> i32 {
        match self {
            PipelineError::InsufficientLength { .. } => PipelineErrorCodes::INSUFFICIENT_LENGTH,
            PipelineError::MismatchedChannelLength { .. } => {
                PipelineErrorCodes::MISMATCHED_CHANNEL_LENGTH
            }
            PipelineError::DegenerateChannel { .. } => PipelineErrorCodes::DEGENERATE_CHANNEL,
            PipelineError::InvalidRecording { .. } => PipelineErrorCodes::INVALID_RECORDING,
            PipelineError::InvalidConfig { .. } => PipelineErrorCodes::INVALID_CONFIG,
            PipelineError::InvalidPeaks { .. } => PipelineErrorCodes::INVALID_PEAKS,
            PipelineError::ChannelCountMismatch { .. } => {
                PipelineErrorCodes::CHANNEL_COUNT_MISMATCH
            }
            PipelineError::EmptyInput => PipelineErrorCodes::EMPTY_INPUT,
        }
    }

    fn message(&self) -> String {
        match self {
            PipelineError::InsufficientLength { required, actual } => {
                format!(
                    "Insufficient length: need at least {} samples, got {}",
                    required, actual
                )
            }
            PipelineError::MismatchedChannelLength {
                channel,
                expected,
                actual,
            } => {
                format!(
                    "Channel {} has {} samples, expected {}",
                    channel, actual, expected
                )
            }
            PipelineError::DegenerateChannel { channel } => {
                format!("Channel {} is degenerate (zero variance)", channel)
            }
            PipelineError::InvalidRecording { reason } => {
                format!("Invalid recording: {}", reason)
            }
            PipelineError::InvalidConfig { reason } => {
                format!("Invalid configuration: {}", reason)
            }
            PipelineError::InvalidPeaks { reason } => format!("Invalid peaks: {}", reason),
            PipelineError::ChannelCountMismatch { expected, actual } => {
                format!("Expected {} channels, got {}", expected, actual)
            }
            PipelineError::EmptyInput => "No channels supplied".to_string(),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PipelineError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for PipelineError {}
