// Preprocessor - baseline wander and powerline interference removal
//
// Each channel is conditioned independently:
// 1. Linear-phase FIR high-pass (windowed sinc, Hamming) removes baseline wander
// 2. Second-order IIR notch removes mains interference
//
// Both filters run forward then backward over an odd-reflected extension of
// the signal, so the output is zero-phase and exactly as long as the input.
// The first and last few hundred milliseconds still carry edge transients
// from the reflection; callers should not score beats that close to the ends.

pub mod biquad;
pub mod fir;

use crate::config::PreprocessingConfig;
use crate::error::PipelineError;

use biquad::Biquad;
use fir::{filter_steady, highpass_kernel};

/// Reflection padding used around the notch (three times the filter order + 1)
const NOTCH_PADDING: usize = 9;

/// Conditions raw abdominal channels for QRS detection
#[derive(Debug, Clone)]
pub struct Preprocessor {
    highpass: Vec<f64>,
    notch: Option<Biquad>,
    min_length: usize,
}

impl Preprocessor {
    /// Create a preprocessor for one sampling rate
    ///
    /// # Arguments
    /// * `sample_rate` - Recording sampling rate in Hz
    /// * `config` - Filter parameters
    ///
    /// # Errors
    /// `InvalidConfig` when the tap count is even or too small, or the
    /// baseline cutoff is not below Nyquist
    pub fn new(sample_rate: u32, config: &PreprocessingConfig) -> Result<Self, PipelineError> {
        let fs = sample_rate as f64;
        let taps = config.baseline_num_taps;
        if taps < 3 || taps % 2 == 0 {
            return Err(PipelineError::invalid_config(format!(
                "baseline_num_taps must be odd and >= 3 (got {})",
                taps
            )));
        }
        if !(config.baseline_cutoff_hz > 0.0 && config.baseline_cutoff_hz < fs / 2.0) {
            return Err(PipelineError::invalid_config(format!(
                "baseline_cutoff_hz {} outside (0, {})",
                config.baseline_cutoff_hz,
                fs / 2.0
            )));
        }

        let notch = Biquad::notch(config.powerline_freq_hz as f64, config.notch_quality, fs);
        if notch.is_none() {
            log::warn!(
                "[Preprocessor] Mains {} Hz not below Nyquist at {} Hz; notch disabled",
                config.powerline_freq_hz,
                sample_rate
            );
        }

        Ok(Self {
            highpass: highpass_kernel(taps, config.baseline_cutoff_hz, fs),
            notch,
            min_length: (fir_padding(taps) + 1).max(NOTCH_PADDING + 1),
        })
    }

    /// Shortest channel accepted by [`Preprocessor::condition`]
    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Remove baseline wander and mains interference from one channel
    ///
    /// # Returns
    /// Conditioned channel of the same length
    ///
    /// # Errors
    /// `InsufficientLength` when the channel is shorter than [`Self::min_length`]
    pub fn condition(&self, channel: &[f64]) -> Result<Vec<f64>, PipelineError> {
        if channel.len() < self.min_length {
            return Err(PipelineError::InsufficientLength {
                required: self.min_length,
                actual: channel.len(),
            });
        }

        let pad = fir_padding(self.highpass.len());
        let detrended = filtfilt(channel, pad, |x| filter_steady(&self.highpass, x));

        Ok(match &self.notch {
            Some(notch) => filtfilt(&detrended, NOTCH_PADDING, |x| notch.filter(x)),
            None => detrended,
        })
    }
}

fn fir_padding(num_taps: usize) -> usize {
    3 * (num_taps - 1)
}

/// Forward-backward filtering over an odd-reflected extension.
///
/// Requires `pad < x.len()`.
pub(crate) fn filtfilt<F>(x: &[f64], pad: usize, filter: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let extended = odd_extend(x, pad);
    let mut forward = filter(&extended);
    forward.reverse();
    let mut backward = filter(&forward);
    backward.reverse();
    backward[pad..pad + x.len()].to_vec()
}

/// Extend `x` by `pad` samples on each side with its point reflection about
/// the end samples.
fn odd_extend(x: &[f64], pad: usize) -> Vec<f64> {
    let n = x.len();
    let (first, last) = (x[0], x[n - 1]);
    let mut extended = Vec::with_capacity(n + 2 * pad);
    extended.extend((1..=pad).rev().map(|i| 2.0 * first - x[i]));
    extended.extend_from_slice(x);
    extended.extend((1..=pad).map(|i| 2.0 * last - x[n - 1 - i]));
    extended
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn small_config() -> PreprocessingConfig {
        PreprocessingConfig {
            baseline_num_taps: 201,
            ..PreprocessingConfig::default()
        }
    }

    #[test]
    fn test_odd_extend_reflects_about_endpoints() {
        let extended = odd_extend(&[1.0, 2.0, 4.0, 7.0], 2);
        assert_eq!(extended, vec![-2.0, 0.0, 1.0, 2.0, 4.0, 7.0, 10.0, 12.0]);
    }

    #[test]
    fn test_zero_input_maps_to_zero() {
        let preprocessor = Preprocessor::new(1000, &PreprocessingConfig::default()).unwrap();
        let output = preprocessor.condition(&vec![0.0; 5000]).unwrap();
        assert_eq!(output.len(), 5000);
        assert!(output.iter().all(|&y| y == 0.0));
    }

    #[test]
    fn test_min_length_boundary() {
        let preprocessor = Preprocessor::new(1000, &PreprocessingConfig::default()).unwrap();
        let min = preprocessor.min_length();
        assert_eq!(min, 3001);

        assert!(preprocessor.condition(&vec![0.5; min]).is_ok());
        assert_eq!(
            preprocessor.condition(&vec![0.5; min - 1]).unwrap_err(),
            PipelineError::InsufficientLength {
                required: min,
                actual: min - 1
            }
        );
    }

    #[test]
    fn test_rejects_even_taps() {
        let config = PreprocessingConfig {
            baseline_num_taps: 200,
            ..PreprocessingConfig::default()
        };
        assert!(matches!(
            Preprocessor::new(1000, &config),
            Err(PipelineError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_removes_offset_and_slow_drift() {
        let preprocessor = Preprocessor::new(500, &small_config()).unwrap();
        let signal: Vec<f64> = (0..5000)
            .map(|i| 3.0 + 0.5 * (2.0 * PI * 0.05 * i as f64 / 500.0).sin())
            .collect();
        let output = preprocessor.condition(&signal).unwrap();
        let interior = &output[1000..4000];
        let max_abs = interior.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!(max_abs < 0.05, "residual drift {}", max_abs);
    }

    #[test]
    fn test_preserves_peak_location() {
        let preprocessor = Preprocessor::new(1000, &small_config()).unwrap();
        let mut signal = vec![0.0; 4000];
        for (i, sample) in signal.iter_mut().enumerate() {
            let t = (i as f64 - 2000.0) / 10.0;
            *sample = (-0.5 * t * t).exp();
        }
        let output = preprocessor.condition(&signal).unwrap();
        let peak = output
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 2000);
    }

    #[test]
    fn test_notch_skipped_below_nyquist() {
        let preprocessor = Preprocessor::new(100, &small_config()).unwrap();
        assert!(preprocessor.notch.is_none());
        assert!(preprocessor.condition(&vec![1.0; 1000]).is_ok());
    }
}
