// ChannelCombiner - fuse residual channels into one fetal-enhanced signal
//
// Two strategies:
// - SnrWeighted: weighted sum, weight = fetal-band energy fraction / variance
// - PrincipalComponent: projection on the dominant eigenvector of the
//   normalised channel covariance
//
// Constant, silent or non-finite channels are degenerate. They get weight
// zero and are reported back to the caller; they never abort the combination.
//
// SnrWeighted polarity is decided on the fetal band only, over the samples
// outside the maternal QRS spans the caller excludes. Cancellation leftovers
// are largest inside those spans and differ in sign between leads.

use std::ops::Range;

use crate::config::{CombinationConfig, CombineStrategy};
use crate::error::PipelineError;

use super::spectrum::{band_energy_fraction, band_pass};

/// Absolute variance floor below which a channel counts as silent
const MIN_VARIANCE: f64 = 1e-24;

/// Below this share of kept samples the polarity decision uses every sample
const MIN_KEPT_FRACTION: f64 = 0.1;

const POWER_ITERATIONS: usize = 200;
const POWER_TOLERANCE: f64 = 1e-12;

/// Combined signal plus the per-channel decisions behind it
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedSignal {
    pub samples: Vec<f64>,
    /// Non-negative weights summing to 1
    pub weights: Vec<f64>,
    /// +1.0 or -1.0 per channel
    pub polarity: Vec<f64>,
    pub degenerate_channels: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ChannelCombiner {
    sample_rate: u32,
    config: CombinationConfig,
}

impl ChannelCombiner {
    pub fn new(sample_rate: u32, config: &CombinationConfig) -> Self {
        Self {
            sample_rate,
            config: config.clone(),
        }
    }

    /// Fuse residual channels sample by sample
    ///
    /// # Errors
    /// `EmptyInput` for zero channels, `MismatchedChannelLength` when the
    /// channels differ in length, `InvalidRecording` for empty channels
    pub fn combine(&self, residuals: &[Vec<f64>]) -> Result<CombinedSignal, PipelineError> {
        self.combine_excluding(residuals, &[])
    }

    /// Same as [`Self::combine`], with `excluded` sample ranges (maternal QRS
    /// spans) left out of the polarity decision. Ranges may overlap or run
    /// past the end.
    pub fn combine_excluding(
        &self,
        residuals: &[Vec<f64>],
        excluded: &[Range<usize>],
    ) -> Result<CombinedSignal, PipelineError> {
        let len = check_shape(residuals)?;

        let stats: Vec<ChannelStats> = residuals.iter().map(|c| ChannelStats::of(c)).collect();
        let degenerate_channels: Vec<usize> = stats
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_degenerate())
            .map(|(i, _)| i)
            .collect();
        for &channel in &degenerate_channels {
            tracing::warn!(
                "[ChannelCombiner] {}; weight set to zero",
                PipelineError::DegenerateChannel { channel }
            );
        }

        let (weights, polarity, samples) = match self.config.strategy {
            CombineStrategy::SnrWeighted => self.snr_weighted(residuals, &stats, len, excluded),
            CombineStrategy::PrincipalComponent => principal_component(residuals, &stats, len),
        };

        tracing::debug!(
            "[ChannelCombiner] {:?} weights {:?} polarity {:?}",
            self.config.strategy,
            weights,
            polarity
        );

        Ok(CombinedSignal {
            samples,
            weights,
            polarity,
            degenerate_channels,
        })
    }

    fn snr_weighted(
        &self,
        residuals: &[Vec<f64>],
        stats: &[ChannelStats],
        len: usize,
        excluded: &[Range<usize>],
    ) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let raw: Vec<f64> = residuals
            .iter()
            .zip(stats)
            .map(|(channel, s)| {
                if s.is_degenerate() {
                    return 0.0;
                }
                let fraction = band_energy_fraction(
                    channel,
                    self.sample_rate,
                    self.config.fetal_band_low_hz,
                    self.config.fetal_band_high_hz,
                );
                fraction / s.variance
            })
            .collect();
        let weights = normalise_weights(raw, stats);

        let polarity = if self.config.align_polarity {
            self.align_polarity(residuals, &weights, excluded)
        } else {
            vec![1.0; residuals.len()]
        };

        let mut samples = vec![0.0; len];
        for ((channel, &w), &p) in residuals.iter().zip(&weights).zip(&polarity) {
            if w == 0.0 {
                continue;
            }
            for (out, &x) in samples.iter_mut().zip(channel) {
                *out += w * p * x;
            }
        }
        (weights, polarity, samples)
    }

    /// Sign of every channel relative to the highest-weighted one
    fn align_polarity(
        &self,
        residuals: &[Vec<f64>],
        weights: &[f64],
        excluded: &[Range<usize>],
    ) -> Vec<f64> {
        let reference = argmax(weights);
        let keep = kept_samples(residuals[reference].len(), excluded);
        let fetal_band = |channel: &[f64]| {
            band_pass(
                &gate(channel, &keep),
                self.sample_rate,
                self.config.fetal_band_low_hz,
                self.config.fetal_band_high_hz,
            )
        };
        let reference_band = fetal_band(&residuals[reference]);

        residuals
            .iter()
            .enumerate()
            .map(|(index, channel)| {
                if index == reference || weights[index] <= 0.0 {
                    return 1.0;
                }
                let r = correlation_over(&fetal_band(channel), &reference_band, |i| keep[i]);
                if r < 0.0 {
                    -1.0
                } else {
                    1.0
                }
            })
            .collect()
    }
}

/// Mask of samples outside every excluded range. Falls back to all samples
/// when too few remain.
fn kept_samples(len: usize, excluded: &[Range<usize>]) -> Vec<bool> {
    let mut keep = vec![true; len];
    for range in excluded {
        let end = range.end.min(len);
        if range.start < end {
            keep[range.start..end].fill(false);
        }
    }

    let kept = keep.iter().filter(|&&k| k).count();
    if kept == 0 || (kept as f64) < MIN_KEPT_FRACTION * len as f64 {
        tracing::debug!(
            "[ChannelCombiner] {} of {} samples outside maternal complexes; polarity uses all",
            kept,
            len
        );
        return vec![true; len];
    }
    keep
}

/// Kept samples minus their mean, zero elsewhere
fn gate(channel: &[f64], keep: &[bool]) -> Vec<f64> {
    let (sum, count) = channel
        .iter()
        .zip(keep)
        .filter(|&(_, &k)| k)
        .fold((0.0_f64, 0usize), |(s, c), (x, _)| (s + *x, c + 1));
    let mean = if count > 0 { sum / count as f64 } else { 0.0 };
    channel
        .iter()
        .zip(keep)
        .map(|(x, &k)| if k { x - mean } else { 0.0 })
        .collect()
}

/// One-shot form of [`ChannelCombiner::combine`]
pub fn combine(
    residuals: &[Vec<f64>],
    sample_rate: u32,
    config: &CombinationConfig,
) -> Result<CombinedSignal, PipelineError> {
    ChannelCombiner::new(sample_rate, config).combine(residuals)
}

fn check_shape(residuals: &[Vec<f64>]) -> Result<usize, PipelineError> {
    let first = residuals.first().ok_or(PipelineError::EmptyInput)?;
    let expected = first.len();
    if expected == 0 {
        return Err(PipelineError::invalid_recording(
            "residual channels must not be empty",
        ));
    }
    for (channel, residual) in residuals.iter().enumerate() {
        if residual.len() != expected {
            return Err(PipelineError::MismatchedChannelLength {
                channel,
                expected,
                actual: residual.len(),
            });
        }
    }
    Ok(expected)
}

#[derive(Debug, Clone, Copy)]
struct ChannelStats {
    mean: f64,
    variance: f64,
    mean_square: f64,
}

impl ChannelStats {
    fn of(channel: &[f64]) -> Self {
        let n = channel.len() as f64;
        let mean = channel.iter().sum::<f64>() / n;
        let variance = channel.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let mean_square = channel.iter().map(|x| x * x).sum::<f64>() / n;
        Self {
            mean,
            variance,
            mean_square,
        }
    }

    fn is_degenerate(&self) -> bool {
        !self.variance.is_finite()
            || !self.mean.is_finite()
            || self.variance < MIN_VARIANCE
            || self.variance <= f64::EPSILON * self.mean_square
    }
}

/// Normalise raw weights to sum 1, falling back to uniform weights over the
/// usable channels (or all channels when none is usable)
fn normalise_weights(raw: Vec<f64>, stats: &[ChannelStats]) -> Vec<f64> {
    let total: f64 = raw.iter().filter(|w| w.is_finite()).sum();
    if total > 0.0 && total.is_finite() {
        return raw
            .iter()
            .map(|w| if w.is_finite() { w / total } else { 0.0 })
            .collect();
    }

    let usable = stats.iter().filter(|s| !s.is_degenerate()).count();
    if usable == 0 {
        tracing::warn!("[ChannelCombiner] Every channel is degenerate; using uniform weights");
        return vec![1.0 / stats.len() as f64; stats.len()];
    }
    stats
        .iter()
        .map(|s| if s.is_degenerate() { 0.0 } else { 1.0 / usable as f64 })
        .collect()
}

fn principal_component(
    residuals: &[Vec<f64>],
    stats: &[ChannelStats],
    len: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    // Unit-norm, zero-mean rows; degenerate channels stay zero
    let rows: Vec<Vec<f64>> = residuals
        .iter()
        .zip(stats)
        .map(|(channel, s)| {
            if s.is_degenerate() {
                return vec![0.0; len];
            }
            let norm = (s.mean_square * len as f64).sqrt();
            let centre = s.mean / norm;
            channel.iter().map(|x| x / norm - centre).collect()
        })
        .collect();

    let m = rows.len();
    let mut covariance = vec![vec![0.0; m]; m];
    for a in 0..m {
        for b in a..m {
            let c = dot(&rows[a], &rows[b]);
            covariance[a][b] = c;
            covariance[b][a] = c;
        }
    }

    let Some(component) = dominant_eigenvector(&covariance) else {
        tracing::warn!("[ChannelCombiner] Covariance is zero; using uniform weights");
        let weights = normalise_weights(vec![0.0; m], stats);
        let samples = (0..len)
            .map(|i| residuals.iter().zip(&weights).map(|(c, w)| w * c[i]).sum())
            .collect();
        return (weights, vec![1.0; m], samples);
    };

    let samples = (0..len)
        .map(|i| rows.iter().zip(&component).map(|(row, v)| v * row[i]).sum())
        .collect();
    let loading_sum: f64 = component.iter().map(|v| v.abs()).sum();
    let weights = component.iter().map(|v| v.abs() / loading_sum).collect();
    let polarity = component
        .iter()
        .map(|&v| if v < 0.0 { -1.0 } else { 1.0 })
        .collect();
    (weights, polarity, samples)
}

/// Unit eigenvector of the largest eigenvalue by power iteration, sign fixed
/// so the largest loading is positive. `None` for a zero matrix.
fn dominant_eigenvector(matrix: &[Vec<f64>]) -> Option<Vec<f64>> {
    let start = matrix
        .iter()
        .max_by(|a, b| dot(a, a).total_cmp(&dot(b, b)))?
        .clone();
    let mut vector = unit(start)?;

    for _ in 0..POWER_ITERATIONS {
        let next = unit(matrix.iter().map(|row| dot(row, &vector)).collect())?;
        let change: f64 = next.iter().zip(&vector).map(|(a, b)| (a - b).abs()).sum();
        vector = next;
        if change < POWER_TOLERANCE {
            break;
        }
    }

    let largest = argmax(&vector.iter().map(|v| v.abs()).collect::<Vec<_>>());
    if vector[largest] < 0.0 {
        vector.iter_mut().for_each(|v| *v = -*v);
    }
    Some(vector)
}

fn unit(vector: Vec<f64>) -> Option<Vec<f64>> {
    let norm = dot(&vector, &vector).sqrt();
    if !(norm > 0.0) || !norm.is_finite() {
        return None;
    }
    Some(vector.into_iter().map(|v| v / norm).collect())
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// Pearson correlation, 0 when either signal is constant
pub(crate) fn correlation(a: &[f64], b: &[f64]) -> f64 {
    correlation_over(a, b, |_| true)
}

/// Pearson correlation over the sample indices `include` accepts
fn correlation_over<F>(a: &[f64], b: &[f64], include: F) -> f64
where
    F: Fn(usize) -> bool,
{
    let n = a.len().min(b.len());
    let indices: Vec<usize> = (0..n).filter(|&i| include(i)).collect();
    if indices.is_empty() {
        return 0.0;
    }
    let count = indices.len() as f64;
    let mean_a = indices.iter().map(|&i| a[i]).sum::<f64>() / count;
    let mean_b = indices.iter().map(|&i| b[i]).sum::<f64>() / count;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for &i in &indices {
        let (dx, dy) = (a[i] - mean_a, b[i] - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a * var_b).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const FS: u32 = 500;

    fn wave(len: usize, freq_hz: f64, phase: f64) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * PI * freq_hz * i as f64 / FS as f64 + phase).sin())
            .collect()
    }

    fn snr_combiner() -> ChannelCombiner {
        ChannelCombiner::new(FS, &CombinationConfig::default())
    }

    fn pca_combiner() -> ChannelCombiner {
        ChannelCombiner::new(
            FS,
            &CombinationConfig {
                strategy: CombineStrategy::PrincipalComponent,
                ..CombinationConfig::default()
            },
        )
    }

    fn two_tone(len: usize) -> Vec<f64> {
        wave(len, 12.0, 0.3)
            .iter()
            .zip(wave(len, 31.0, 1.1).iter())
            .map(|(a, b)| a + 0.5 * b)
            .collect()
    }

    #[test]
    fn test_two_identical_channels_reproduce_input_exactly() {
        let channel = two_tone(2000);
        let residuals = vec![channel.clone(); 2];

        let combined = snr_combiner().combine(&residuals).unwrap();
        assert_eq!(combined.weights, vec![0.5, 0.5]);
        assert_eq!(combined.polarity, vec![1.0, 1.0]);
        // 0.5 * x + 0.5 * x is exact in binary floating point
        assert_eq!(combined.samples, channel);
    }

    #[test]
    fn test_identical_channels_reproduce_input_within_rounding() {
        // Quarter weights summed four times can differ from x in the last bit
        let channel = two_tone(2000);
        let residuals = vec![channel.clone(); 4];

        let combined = snr_combiner().combine(&residuals).unwrap();
        for w in &combined.weights {
            assert!((w - 0.25).abs() < 1e-12);
        }
        for (out, x) in combined.samples.iter().zip(&channel) {
            assert!((out - x).abs() < 1e-12);
        }
        assert!(combined.degenerate_channels.is_empty());
    }

    #[test]
    fn test_degenerate_channel_gets_zero_weight() {
        let residuals = vec![wave(1000, 15.0, 0.0), vec![0.0; 1000], vec![3.0; 1000]];
        let combined = snr_combiner().combine(&residuals).unwrap();
        assert_eq!(combined.degenerate_channels, vec![1, 2]);
        assert_eq!(combined.weights, vec![1.0, 0.0, 0.0]);
        assert_eq!(combined.samples, residuals[0]);
    }

    #[test]
    fn test_all_degenerate_falls_back_to_uniform() {
        let residuals = vec![vec![0.0; 100], vec![2.0; 100]];
        let combined = snr_combiner().combine(&residuals).unwrap();
        assert_eq!(combined.degenerate_channels, vec![0, 1]);
        assert_eq!(combined.weights, vec![0.5, 0.5]);
        assert!(combined.samples.iter().all(|&x| x == 1.0));
    }

    #[test]
    fn test_noisier_channel_downweighted() {
        let clean = wave(2048, 20.0, 0.0);
        let noisy: Vec<f64> = clean
            .iter()
            .zip(wave(2048, 120.0, 0.4).iter())
            .map(|(a, b)| a + 2.0 * b)
            .collect();
        let combined = snr_combiner().combine(&[clean, noisy]).unwrap();
        assert!(combined.weights[0] > 0.9, "weights {:?}", combined.weights);
    }

    #[test]
    fn test_polarity_alignment_flips_inverted_channel() {
        let base = wave(1000, 18.0, 0.0);
        let inverted: Vec<f64> = base.iter().map(|x| -1.5 * x).collect();
        let combined = snr_combiner().combine(&[base.clone(), inverted]).unwrap();
        assert_eq!(combined.polarity, vec![1.0, -1.0]);
        // Both contributions add up instead of cancelling
        let peak = combined.samples.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
        assert!(peak > 0.9);
    }

    /// Two leads sharing a fetal train, with a large maternal leftover of
    /// opposite sign in each lead
    fn leads_with_maternal_leftover() -> (Vec<Vec<f64>>, Vec<Range<usize>>) {
        let len = 5000;
        let maternal_centres: Vec<usize> = (200..len).step_by(420).collect();
        let fetal_centres: Vec<usize> = (305..len).step_by(210).collect();

        let bump = |centres: &[usize], i: usize, sigma: f64, shape: fn(f64) -> f64| {
            centres
                .iter()
                .map(|&c| shape((i as f64 - c as f64) / sigma))
                .sum::<f64>()
        };
        let maternal: Vec<f64> = (0..len)
            .map(|i| bump(&maternal_centres, i, 10.0, |t| -t * (-0.5 * t * t).exp()))
            .collect();
        let fetal: Vec<f64> = (0..len)
            .map(|i| 0.1 * bump(&fetal_centres, i, 4.0, |t| (-0.5 * t * t).exp()))
            .collect();

        let first: Vec<f64> = fetal.iter().zip(&maternal).map(|(f, m)| f + m).collect();
        let second: Vec<f64> = fetal.iter().zip(&maternal).map(|(f, m)| f - 0.8 * m).collect();
        let spans = maternal_centres
            .iter()
            .map(|&c| c.saturating_sub(60)..c + 61)
            .collect();
        (vec![first, second], spans)
    }

    #[test]
    fn test_whole_signal_polarity_follows_maternal_leftover() {
        let (residuals, _) = leads_with_maternal_leftover();
        let combined = snr_combiner().combine(&residuals).unwrap();
        assert!(combined.polarity.contains(&-1.0), "polarity {:?}", combined.polarity);
    }

    #[test]
    fn test_polarity_ignores_excluded_maternal_spans() {
        let (residuals, spans) = leads_with_maternal_leftover();
        let combined = snr_combiner().combine_excluding(&residuals, &spans).unwrap();
        assert_eq!(combined.polarity, vec![1.0, 1.0]);

        // Fetal beats add up at full amplitude between maternal complexes
        for centre in [305, 1145, 2405] {
            assert!(
                (combined.samples[centre] - 0.1).abs() < 1e-6,
                "sample {} = {}",
                centre,
                combined.samples[centre]
            );
        }
    }

    #[test]
    fn test_kept_samples_falls_back_when_mostly_excluded() {
        let keep = kept_samples(10, &[2..4, 8..20]);
        assert_eq!(
            keep,
            vec![true, true, false, false, true, true, true, true, false, false]
        );
        assert!(kept_samples(10, &[0..10]).iter().all(|&k| k));
        assert!(kept_samples(100, &[0..95]).iter().all(|&k| k));
        assert_eq!(kept_samples(100, &[0..90]).iter().filter(|&&k| k).count(), 10);
    }

    #[test]
    fn test_correlation_over_subset() {
        let a = [1.0, 2.0, 3.0, 10.0, -10.0];
        let b = [2.0, 4.0, 6.0, -10.0, 10.0];
        assert!(correlation(&a, &b) < 0.0);
        assert!((correlation_over(&a, &b, |i| i < 3) - 1.0).abs() < 1e-12);
        assert_eq!(correlation_over(&a, &b, |_| false), 0.0);
    }

    #[test]
    fn test_shape_errors() {
        assert_eq!(snr_combiner().combine(&[]).unwrap_err(), PipelineError::EmptyInput);
        assert_eq!(
            snr_combiner()
                .combine(&[vec![0.0; 10], vec![0.0; 9]])
                .unwrap_err(),
            PipelineError::MismatchedChannelLength {
                channel: 1,
                expected: 10,
                actual: 9
            }
        );
        assert!(matches!(
            snr_combiner().combine(&[vec![]]),
            Err(PipelineError::InvalidRecording { .. })
        ));
    }

    #[test]
    fn test_principal_component_of_scaled_copies() {
        let base = wave(1000, 10.0, 0.2);
        let residuals = vec![
            base.clone(),
            base.iter().map(|x| 2.0 * x).collect(),
            base.iter().map(|x| -0.5 * x).collect(),
        ];
        let combined = pca_combiner().combine(&residuals).unwrap();

        // All rows are equal up to sign after normalisation
        for w in &combined.weights {
            assert!((w - 1.0 / 3.0).abs() < 1e-9);
        }
        assert_eq!(combined.polarity, vec![1.0, 1.0, -1.0]);
        assert!(correlation(&combined.samples, &base) > 0.999);
    }

    #[test]
    fn test_principal_component_ignores_degenerate() {
        let residuals = vec![wave(800, 10.0, 0.0), vec![1.0; 800]];
        let combined = pca_combiner().combine(&residuals).unwrap();
        assert_eq!(combined.degenerate_channels, vec![1]);
        assert_eq!(combined.weights[1], 0.0);
    }

    #[test]
    fn test_correlation() {
        let a = [1.0, 2.0, 3.0, 4.0];
        assert!((correlation(&a, &[2.0, 4.0, 6.0, 8.0]) - 1.0).abs() < 1e-12);
        assert!((correlation(&a, &[4.0, 3.0, 2.0, 1.0]) + 1.0).abs() < 1e-12);
        assert_eq!(correlation(&a, &[1.0; 4]), 0.0);
    }
}
