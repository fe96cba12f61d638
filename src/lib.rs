// FECG Core - fetal ECG extraction from abdominal recordings
// Batch signal-separation pipeline: conditioning, maternal cancellation,
// channel fusion, fetal QRS detection and scoring

// Module declarations
pub mod analysis;
pub mod config;
pub mod error;
pub mod recording;
pub mod testing;

// Re-exports for convenience
pub use analysis::cancellation::{MaternalCanceller, MaternalTemplate};
pub use analysis::combiner::{ChannelCombiner, CombinedSignal};
pub use analysis::preprocess::Preprocessor;
pub use analysis::qrs::{detect_fetal, detect_maternal, QrsDetector};
pub use analysis::scoring::{compare_average_complexes, MetricReport, MorphologyReport, Scorer};
pub use analysis::{evaluate, run_batch, run_pipeline, PipelineOutput};
pub use config::PipelineConfig;
pub use error::{ErrorCode, PipelineError};
pub use recording::{GroundTruth, PeakSet, Recording};
