// Analysis module - fetal ECG extraction pipeline
//
// This module composes the signal-processing stages into one call per
// recording and a batch driver for many recordings.
//
// Architecture:
// - Preprocessor: baseline wander + powerline removal, per channel
// - QrsDetector: maternal beats, per channel
// - MaternalCanceller: adaptive template subtraction, per channel
// - ChannelCombiner: residual channels -> one enhanced signal
// - QrsDetector: fetal beats on the enhanced signal
// - Scorer: detected fetal beats vs reference annotations
//
// Every stage borrows its input and returns fresh output; nothing is shared
// between recordings, so recordings can run on independent threads.

use serde::Serialize;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::config::{PipelineConfig, ScoringConfig};
use crate::error::{log_pipeline_error, PipelineError};
use crate::recording::{GroundTruth, PeakSet, Recording};

pub mod cancellation;
pub mod combiner;
pub mod preprocess;
pub mod qrs;
pub mod scoring;
pub mod spectrum;
pub mod threshold;

use cancellation::MaternalCanceller;
use combiner::ChannelCombiner;
use preprocess::Preprocessor;
use qrs::{detect_fetal, QrsDetector};
use scoring::MetricReport;

/// Everything one pipeline run produces for a recording
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutput {
    pub fetal_peaks: PeakSet,
    /// Maternal peaks of the reference channel
    pub maternal_peaks: PeakSet,
    pub maternal_peaks_per_channel: Vec<PeakSet>,
    /// Combined residual the fetal beats were detected on
    pub enhanced: Vec<f64>,
    pub channel_weights: Vec<f64>,
    pub degenerate_channels: Vec<usize>,
    /// Conditioned channel with the largest variance
    pub reference_channel: usize,
}

/// Run the full extraction pipeline on one recording
///
/// # Arguments
/// * `recording` - Raw abdominal channels
/// * `config` - Pipeline parameters, validated before any processing
///
/// # Errors
/// `InvalidConfig` for out-of-domain parameters, `InsufficientLength` when
/// the recording is shorter than the baseline filter allows
pub fn run_pipeline(
    recording: &Recording,
    config: &PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    config.validate()?;
    let fs = recording.sample_rate();

    let preprocessor = Preprocessor::new(fs, &config.preprocessing)?;
    let conditioned = recording
        .channels()
        .iter()
        .map(|channel| preprocessor.condition(channel))
        .collect::<Result<Vec<_>, _>>()?;

    let maternal_detector = QrsDetector::maternal(fs, &config.maternal_detection);
    let maternal_peaks_per_channel: Vec<PeakSet> = conditioned
        .iter()
        .map(|channel| maternal_detector.detect(channel))
        .collect();

    let canceller = MaternalCanceller::new(fs, &config.cancellation);
    let residuals = conditioned
        .iter()
        .zip(&maternal_peaks_per_channel)
        .map(|(channel, peaks)| canceller.cancel(channel, peaks))
        .collect::<Result<Vec<_>, _>>()?;

    let len = recording.len();
    let maternal_spans: Vec<Range<usize>> = maternal_peaks_per_channel
        .iter()
        .flat_map(|peaks| peaks.iter())
        .map(|peak| canceller.qrs_span(peak, len))
        .collect();
    let combined = ChannelCombiner::new(fs, &config.combination)
        .combine_excluding(&residuals, &maternal_spans)?;

    let reference_channel = largest_variance(&conditioned);
    let maternal_peaks = maternal_peaks_per_channel[reference_channel].clone();
    let fetal_peaks = detect_fetal(
        &combined.samples,
        fs,
        &config.fetal_detection,
        Some(&maternal_peaks),
    );

    tracing::info!(
        "[Pipeline] {} channels, {:.1} s: {} maternal beats (channel {}), {} fetal beats",
        recording.num_channels(),
        recording.duration_secs(),
        maternal_peaks.len(),
        reference_channel,
        fetal_peaks.len()
    );

    Ok(PipelineOutput {
        fetal_peaks,
        maternal_peaks,
        maternal_peaks_per_channel,
        enhanced: combined.samples,
        channel_weights: combined.weights,
        degenerate_channels: combined.degenerate_channels,
        reference_channel,
    })
}

/// Score detected fetal peaks against reference annotations
pub fn evaluate(
    fetal_peaks: &PeakSet,
    ground_truth: &GroundTruth,
    sample_rate: u32,
    config: &ScoringConfig,
) -> MetricReport {
    scoring::score(fetal_peaks, ground_truth, sample_rate, config)
}

/// Run the pipeline over many recordings on scoped worker threads
///
/// At most `available_parallelism` workers pull recordings from a shared
/// index; results come back in input order.
pub fn run_batch(
    recordings: &[Recording],
    config: &PipelineConfig,
) -> Vec<Result<PipelineOutput, PipelineError>> {
    if recordings.is_empty() {
        return Vec::new();
    }
    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(recordings.len());
    tracing::info!(
        "[Pipeline] Batch of {} recordings on {} workers",
        recordings.len(),
        workers
    );

    let next = AtomicUsize::new(0);
    let next = &next;
    let mut results: Vec<(usize, Result<PipelineOutput, PipelineError>)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(recording) = recordings.get(index) else {
                            break;
                        };
                        let result = run_pipeline(recording, config);
                        if let Err(err) = &result {
                            log_pipeline_error(err, &format!("run_batch[{}]", index));
                        }
                        done.push((index, result));
                    }
                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(done) => done,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });

    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}

fn largest_variance(channels: &[Vec<f64>]) -> usize {
    channels
        .iter()
        .map(|channel| {
            let n = channel.len() as f64;
            let mean = channel.iter().sum::<f64>() / n;
            channel.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n
        })
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best })
        .0
}
