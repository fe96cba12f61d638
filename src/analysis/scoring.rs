// Scorer - detection accuracy against reference annotations
//
// Detected and reference beats are matched one-to-one within a tolerance
// window. Reference beats are visited in time order; each takes the nearest
// still-unmatched detection inside the window (the earlier one on a tie).

use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;
use crate::recording::{GroundTruth, PeakSet};

/// Which ratios had a zero denominator (and were reported as 0.0)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndefinedMetrics {
    pub sensitivity: bool,
    pub ppv: bool,
    pub f1: bool,
    pub accuracy: bool,
}

impl UndefinedMetrics {
    pub fn any(&self) -> bool {
        self.sensitivity || self.ppv || self.f1 || self.accuracy
    }
}

/// Detection counts and derived ratios for one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// TP / (TP + FN)
    pub sensitivity: f64,
    /// TP / (TP + FP)
    pub ppv: f64,
    /// Harmonic mean of sensitivity and PPV, 2TP / (2TP + FP + FN)
    pub f1: f64,
    /// TP / (TP + FP + FN)
    pub accuracy: f64,
    pub undefined: UndefinedMetrics,
}

impl MetricReport {
    /// Derive every ratio from the three counts
    pub fn from_counts(true_positives: usize, false_positives: usize, false_negatives: usize) -> Self {
        let tp = true_positives;
        let (sensitivity, sensitivity_undefined) = ratio(tp, tp + false_negatives);
        let (ppv, ppv_undefined) = ratio(tp, tp + false_positives);
        let (f1, f1_undefined) = ratio(2 * tp, 2 * tp + false_positives + false_negatives);
        let (accuracy, accuracy_undefined) = ratio(tp, tp + false_positives + false_negatives);

        Self {
            true_positives,
            false_positives,
            false_negatives,
            sensitivity,
            ppv,
            f1,
            accuracy,
            undefined: UndefinedMetrics {
                sensitivity: sensitivity_undefined,
                ppv: ppv_undefined,
                f1: f1_undefined,
                accuracy: accuracy_undefined,
            },
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> (f64, bool) {
    if denominator == 0 {
        (0.0, true)
    } else {
        (numerator as f64 / denominator as f64, false)
    }
}

/// Tolerance-window beat matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scorer {
    tolerance: usize,
}

impl Scorer {
    /// Tolerance is `round(match_tolerance_ms * fs / 1000)` samples, inclusive
    pub fn new(sample_rate: u32, config: &ScoringConfig) -> Self {
        let tolerance = (config.match_tolerance_ms * sample_rate as f64 / 1000.0).round();
        Self::with_tolerance(tolerance.max(0.0) as usize)
    }

    pub fn with_tolerance(tolerance: usize) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> usize {
        self.tolerance
    }

    /// Match sorted detections against sorted reference beats
    pub fn score(&self, detected: &[usize], reference: &[usize]) -> MetricReport {
        let mut taken = vec![false; detected.len()];
        let mut true_positives = 0;

        for &beat in reference {
            let first = detected.partition_point(|&d| d + self.tolerance < beat);
            let mut best: Option<(usize, usize)> = None;
            for (offset, &d) in detected[first..].iter().enumerate() {
                if d > beat + self.tolerance {
                    break;
                }
                let index = first + offset;
                if taken[index] {
                    continue;
                }
                let distance = d.abs_diff(beat);
                if best.map_or(true, |(_, closest)| distance < closest) {
                    best = Some((index, distance));
                }
            }
            if let Some((index, _)) = best {
                taken[index] = true;
                true_positives += 1;
            }
        }

        MetricReport::from_counts(
            true_positives,
            detected.len() - true_positives,
            reference.len() - true_positives,
        )
    }
}

/// Score detected fetal peaks against reference annotations
pub fn score(
    detected: &PeakSet,
    reference: &GroundTruth,
    sample_rate: u32,
    config: &ScoringConfig,
) -> MetricReport {
    let report = Scorer::new(sample_rate, config).score(detected.as_slice(), reference.as_slice());
    tracing::debug!(
        "[Scorer] TP={} FP={} FN={} sensitivity={:.3} ppv={:.3}",
        report.true_positives,
        report.false_positives,
        report.false_negatives,
        report.sensitivity,
        report.ppv
    );
    report
}

/// Similarity of the average complexes around two peak sets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MorphologyReport {
    /// Pearson correlation of the two average complexes
    pub correlation: f64,
    /// Mean squared difference between them
    pub mse: f64,
}

/// Compare the average complex at `estimated` peaks with the one at
/// `reference` peaks, both taken from `signal` over `±half_window` samples.
///
/// Returns `None` when either peak set has no complete window or either
/// average is flat.
pub fn compare_average_complexes(
    signal: &[f64],
    estimated: &[usize],
    reference: &[usize],
    half_window: usize,
) -> Option<MorphologyReport> {
    let estimated = average_complex(signal, estimated, half_window)?;
    let reference = average_complex(signal, reference, half_window)?;

    let n = estimated.len() as f64;
    let mse = estimated
        .iter()
        .zip(&reference)
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        / n;

    let mean_a = estimated.iter().sum::<f64>() / n;
    let mean_b = reference.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (a, b) in estimated.iter().zip(&reference) {
        cov += (a - mean_a) * (b - mean_b);
        var_a += (a - mean_a).powi(2);
        var_b += (b - mean_b).powi(2);
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return None;
    }

    Some(MorphologyReport {
        correlation: cov / (var_a * var_b).sqrt(),
        mse,
    })
}

fn average_complex(signal: &[f64], peaks: &[usize], half_window: usize) -> Option<Vec<f64>> {
    let width = 2 * half_window + 1;
    let mut sum = vec![0.0; width];
    let mut count = 0usize;
    for &peak in peaks {
        let Some(start) = peak.checked_sub(half_window) else {
            continue;
        };
        let Some(window) = signal.get(start..start + width) else {
            continue;
        };
        for (acc, x) in sum.iter_mut().zip(window) {
            *acc += x;
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(sum.into_iter().map(|s| s / count as f64).collect())
}
