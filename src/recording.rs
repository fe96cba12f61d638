//! Recording, peak set and annotation types shared by every stage.
//!
//! A [`Recording`] is built once by the caller and only borrowed afterwards;
//! stages read channel slices and return freshly allocated outputs.

use serde::{Deserialize, Serialize};

use crate::analysis::spectrum;
use crate::error::PipelineError;

/// Multi-channel abdominal ECG recording at a fixed sampling rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    sample_rate: u32,
    channels: Vec<Vec<f64>>,
    labels: Vec<String>,
}

impl Recording {
    /// Build a recording with default labels `AECG1..AECGn`.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f64>>) -> Result<Self, PipelineError> {
        let labels = (1..=channels.len()).map(|i| format!("AECG{}", i)).collect();
        Self::with_labels(sample_rate, channels, labels)
    }

    /// Build a recording with caller-supplied channel labels.
    ///
    /// Rejects zero sampling rate, zero channels, empty channels,
    /// non-finite samples and channels of differing length.
    pub fn with_labels(
        sample_rate: u32,
        channels: Vec<Vec<f64>>,
        labels: Vec<String>,
    ) -> Result<Self, PipelineError> {
        if sample_rate == 0 {
            return Err(PipelineError::invalid_recording("sampling rate must be > 0"));
        }
        let Some(first) = channels.first() else {
            return Err(PipelineError::invalid_recording(
                "recording must have at least one channel",
            ));
        };
        let expected = first.len();
        if expected == 0 {
            return Err(PipelineError::invalid_recording("channels must not be empty"));
        }
        if labels.len() != channels.len() {
            return Err(PipelineError::ChannelCountMismatch {
                expected: channels.len(),
                actual: labels.len(),
            });
        }

        for (index, channel) in channels.iter().enumerate() {
            if channel.len() != expected {
                return Err(PipelineError::MismatchedChannelLength {
                    channel: index,
                    expected,
                    actual: channel.len(),
                });
            }
            if let Some(position) = channel.iter().position(|s| !s.is_finite()) {
                return Err(PipelineError::invalid_recording(format!(
                    "channel {} has a non-finite sample at index {}",
                    index, position
                )));
            }
        }

        Ok(Self {
            sample_rate,
            channels,
            labels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    /// Always false; construction rejects empty recordings
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn channels(&self) -> &[Vec<f64>] {
        &self.channels
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn channel(&self, index: usize) -> Result<&[f64], PipelineError> {
        self.channels.get(index).map(Vec::as_slice).ok_or_else(|| {
            PipelineError::invalid_recording(format!(
                "recording has {} channels, no channel {}",
                self.channels.len(),
                index
            ))
        })
    }

    pub fn channel_by_label(&self, label: &str) -> Result<&[f64], PipelineError> {
        let index = self
            .labels
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| {
                PipelineError::invalid_recording(format!("no channel labelled {}", label))
            })?;
        self.channel(index)
    }

    /// Recording duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    /// Time of each sample in seconds, starting at zero
    pub fn timestamps(&self) -> Vec<f64> {
        let fs = self.sample_rate as f64;
        (0..self.len()).map(|i| i as f64 / fs).collect()
    }

    /// New recording at `target_rate`, every channel Fourier-resampled to
    /// `floor(len * target_rate / sample_rate)` samples. Labels carry over.
    ///
    /// # Errors
    /// `InvalidRecording` for a zero target rate or when the target length
    /// rounds down to zero samples
    pub fn resample(&self, target_rate: u32) -> Result<Recording, PipelineError> {
        if target_rate == 0 {
            return Err(PipelineError::invalid_recording("target sampling rate must be > 0"));
        }
        let target_len =
            (self.len() as u128 * target_rate as u128 / self.sample_rate as u128) as usize;
        let channels: Vec<Vec<f64>> = self
            .channels
            .iter()
            .map(|channel| spectrum::resample(channel, target_len))
            .collect();

        log::debug!(
            "[Recording] Resampled {} channels from {} Hz to {} Hz ({} -> {} samples)",
            self.channels.len(),
            self.sample_rate,
            target_rate,
            self.len(),
            target_len
        );
        Self::with_labels(target_rate, channels, self.labels.clone())
    }
}

/// Strictly increasing sample indices of detected beats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeakSet {
    indices: Vec<usize>,
}

impl PeakSet {
    /// Build a peak set for a signal of `signal_len` samples.
    ///
    /// Indices are sorted and de-duplicated; any index at or beyond
    /// `signal_len` is rejected.
    pub fn from_indices(mut indices: Vec<usize>, signal_len: usize) -> Result<Self, PipelineError> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= signal_len) {
            return Err(PipelineError::InvalidPeaks {
                reason: format!("index {} outside signal of {} samples", bad, signal_len),
            });
        }
        indices.sort_unstable();
        indices.dedup();
        Ok(Self { indices })
    }

    /// Peaks already known to be in range
    pub(crate) fn from_sorted(mut indices: Vec<usize>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        Self { indices }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    pub fn last(&self) -> Option<usize> {
        self.indices.last().copied()
    }

    /// Successive inter-beat intervals in samples
    pub fn intervals(&self) -> Vec<usize> {
        self.indices.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Mean heart rate implied by the peaks, `None` with fewer than two
    pub fn mean_rate_bpm(&self, sample_rate: u32) -> Option<f64> {
        let (first, last) = (self.indices.first()?, self.indices.last()?);
        if self.indices.len() < 2 {
            return None;
        }
        let mean_interval = (last - first) as f64 / (self.indices.len() - 1) as f64;
        Some(60.0 * sample_rate as f64 / mean_interval)
    }
}

/// Reference fetal QRS locations supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroundTruth {
    indices: Vec<usize>,
}

impl GroundTruth {
    /// Annotations given as sample indices (sorted and de-duplicated)
    pub fn from_samples(mut indices: Vec<usize>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        Self { indices }
    }

    /// Annotations given in seconds.
    ///
    /// Each time maps to `round(t * fs)` (half away from zero). Negative and
    /// non-finite times are dropped.
    pub fn from_seconds(times: &[f64], sample_rate: u32) -> Self {
        let fs = sample_rate as f64;
        let indices = times
            .iter()
            .filter(|t| t.is_finite() && **t >= 0.0)
            .map(|t| (t * fs).round() as usize)
            .collect();
        Self::from_samples(indices)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
