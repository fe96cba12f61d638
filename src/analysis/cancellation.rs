// MaternalCanceller - adaptive maternal template subtraction
//
// Per channel, a template of the maternal P-QRS-T complex is seeded from the
// first beats and then tracked with an exponential moving average. Each
// beat is cancelled by:
// 1. Aligning the template to the beat (bounded integer lag search)
// 2. Fitting one least-squares gain per P, QRS and T segment
// 3. Subtracting the scaled template from the residual
//
// The template is owned by a single cancel call and dropped afterwards.

use std::ops::Range;

use crate::config::{ms_to_samples, CancellationConfig};
use crate::error::PipelineError;
use crate::recording::PeakSet;

/// Fraction of the window covered by each cosine edge ramp
const EDGE_TAPER: f64 = 0.1;

/// Segment energy below which the least-squares gain is forced to zero
const MIN_SEGMENT_ENERGY: f64 = 1e-20;

/// Sample layout of one maternal complex around its R peak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplexLayout {
    pub p_len: usize,
    pub qrs_len: usize,
    pub t_len: usize,
}

impl ComplexLayout {
    pub fn new(sample_rate: u32, config: &CancellationConfig) -> Self {
        Self {
            p_len: ms_to_samples(config.p_wave_ms, sample_rate),
            qrs_len: ms_to_samples(config.qrs_ms, sample_rate).max(1),
            t_len: ms_to_samples(config.t_wave_ms, sample_rate),
        }
    }

    /// Samples before the R peak
    pub fn before(&self) -> usize {
        self.p_len + self.qrs_len / 2
    }

    /// Samples after the R peak (the peak itself excluded)
    pub fn after(&self) -> usize {
        self.len() - self.before() - 1
    }

    /// Window length
    pub fn len(&self) -> usize {
        self.p_len + self.qrs_len + self.t_len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// P, QRS and T ranges within the window
    pub fn segments(&self) -> [Range<usize>; 3] {
        let qrs_end = self.p_len + self.qrs_len;
        [0..self.p_len, self.p_len..qrs_end, qrs_end..self.len()]
    }
}

/// Running estimate of one channel's maternal complex
#[derive(Debug, Clone, PartialEq)]
pub struct MaternalTemplate {
    waveform: Vec<f64>,
    beats_absorbed: usize,
}

impl MaternalTemplate {
    /// Mean of the given beat windows (all of equal length)
    pub fn seed(windows: &[&[f64]]) -> Option<Self> {
        let first = windows.first()?;
        let mut waveform = vec![0.0; first.len()];
        for window in windows {
            for (acc, &x) in waveform.iter_mut().zip(window.iter()) {
                *acc += x;
            }
        }
        let count = windows.len() as f64;
        waveform.iter_mut().for_each(|v| *v /= count);

        Some(Self {
            waveform,
            beats_absorbed: windows.len(),
        })
    }

    /// Blend a new beat in: `t = (1 - rate) * t + rate * window`
    pub fn update(&mut self, window: &[f64], rate: f64) {
        for (t, &x) in self.waveform.iter_mut().zip(window.iter()) {
            *t = (1.0 - rate) * *t + rate * x;
        }
        self.beats_absorbed += 1;
    }

    pub fn waveform(&self) -> &[f64] {
        &self.waveform
    }

    pub fn beats_absorbed(&self) -> usize {
        self.beats_absorbed
    }
}

/// Least-squares gains applied to the P, QRS and T segments of one beat
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SegmentGains {
    pub p: f64,
    pub qrs: f64,
    pub t: f64,
}

/// Outcome of cancelling one channel
#[derive(Debug, Clone, PartialEq)]
pub struct Cancellation {
    pub residual: Vec<f64>,
    /// Final template, `None` when no beat window fitted inside the channel
    pub template: Option<MaternalTemplate>,
    /// Gains fitted for every beat, in peak order
    pub gains: Vec<SegmentGains>,
    /// Beats whose window was clipped by a recording edge
    pub clipped_beats: usize,
}

/// Cancels maternal complexes from one channel at a time
#[derive(Debug, Clone)]
pub struct MaternalCanceller {
    layout: ComplexLayout,
    taper: Vec<f64>,
    max_lag: usize,
    update_rate: f64,
    seed_beats: usize,
}

impl MaternalCanceller {
    pub fn new(sample_rate: u32, config: &CancellationConfig) -> Self {
        let layout = ComplexLayout::new(sample_rate, config);
        Self {
            layout,
            taper: tukey(layout.len(), EDGE_TAPER),
            max_lag: ms_to_samples(config.max_lag_ms, sample_rate),
            update_rate: config.template_update_rate,
            seed_beats: config.seed_beats.max(1),
        }
    }

    pub fn layout(&self) -> ComplexLayout {
        self.layout
    }

    /// QRS window around `peak` widened by the lag search, clipped to `len`.
    /// Cancellation leftovers concentrate here.
    pub fn qrs_span(&self, peak: usize, len: usize) -> Range<usize> {
        let half = self.layout.qrs_len / 2 + self.max_lag;
        peak.saturating_sub(half).min(len)..(peak + half + 1).min(len)
    }

    /// Subtract the maternal complex at every peak
    ///
    /// # Arguments
    /// * `channel` - Conditioned channel
    /// * `peaks` - Maternal peaks detected on this channel
    ///
    /// # Returns
    /// Residual channel of the same length
    ///
    /// # Errors
    /// `InvalidPeaks` when a peak lies outside the channel
    pub fn cancel(&self, channel: &[f64], peaks: &PeakSet) -> Result<Vec<f64>, PipelineError> {
        self.cancel_detailed(channel, peaks).map(|c| c.residual)
    }

    /// Same as [`Self::cancel`], also returning the final template and
    /// per-beat fit
    pub fn cancel_detailed(
        &self,
        channel: &[f64],
        peaks: &PeakSet,
    ) -> Result<Cancellation, PipelineError> {
        if let Some(bad) = peaks.iter().find(|&p| p >= channel.len()) {
            return Err(PipelineError::InvalidPeaks {
                reason: format!(
                    "maternal peak {} outside channel of {} samples",
                    bad,
                    channel.len()
                ),
            });
        }

        let unchanged = || Cancellation {
            residual: channel.to_vec(),
            template: None,
            gains: Vec::new(),
            clipped_beats: 0,
        };

        if peaks.is_empty() {
            tracing::debug!("[MaternalCanceller] No maternal peaks; channel passed through");
            return Ok(unchanged());
        }

        let seed_windows: Vec<&[f64]> = peaks
            .iter()
            .filter_map(|peak| self.full_window(channel, peak as isize - self.layout.before() as isize))
            .take(self.seed_beats)
            .collect();
        let Some(mut template) = MaternalTemplate::seed(&seed_windows) else {
            tracing::warn!(
                "[MaternalCanceller] No complete {}-sample window in {} samples; channel passed through",
                self.layout.len(),
                channel.len()
            );
            return Ok(unchanged());
        };

        let mut residual = channel.to_vec();
        let mut gains = Vec::with_capacity(peaks.len());
        let mut clipped_beats = 0;

        for peak in peaks.iter() {
            let shaped = self.shaped(&template);
            let start = self.align(channel, &shaped, peak);
            gains.push(self.subtract(&mut residual, &shaped, start));

            match self.full_window(channel, start) {
                Some(window) => template.update(window, self.update_rate),
                None => clipped_beats += 1,
            }
        }

        tracing::debug!(
            "[MaternalCanceller] Cancelled {} beats ({} clipped), template absorbed {} beats",
            peaks.len(),
            clipped_beats,
            template.beats_absorbed()
        );

        Ok(Cancellation {
            residual,
            template: Some(template),
            gains,
            clipped_beats,
        })
    }

    /// Window starting at `start` if it lies fully inside the channel
    fn full_window<'a>(&self, channel: &'a [f64], start: isize) -> Option<&'a [f64]> {
        let start = usize::try_from(start).ok()?;
        channel.get(start..start + self.layout.len())
    }

    /// Template with tapered edges
    fn shaped(&self, template: &MaternalTemplate) -> Vec<f64> {
        template
            .waveform()
            .iter()
            .zip(self.taper.iter())
            .map(|(t, w)| t * w)
            .collect()
    }

    /// Window start maximising normalised correlation with the template.
    ///
    /// Lags are tried from zero outwards; ties keep the smaller shift.
    fn align(&self, channel: &[f64], shaped: &[f64], peak: usize) -> isize {
        let nominal = peak as isize - self.layout.before() as isize;
        let mut best = (nominal, f64::NEG_INFINITY);

        for step in 0..=2 * self.max_lag {
            let lag = if step % 2 == 0 {
                (step / 2) as isize
            } else {
                -(((step + 1) / 2) as isize)
            };
            let start = nominal + lag;
            let Some((channel_range, template_range)) = overlap(start, shaped.len(), channel.len())
            else {
                continue;
            };

            let segment = &channel[channel_range];
            let norm = segment.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm <= 0.0 {
                continue;
            }
            let score = dot(&shaped[template_range], segment) / norm;
            if score > best.1 {
                best = (start, score);
            }
        }
        best.0
    }

    /// Fit and remove the shaped template at `start`, segment by segment
    fn subtract(&self, residual: &mut [f64], shaped: &[f64], start: isize) -> SegmentGains {
        let mut fitted = [0.0; 3];
        for (gain, segment) in fitted.iter_mut().zip(self.layout.segments()) {
            let Some((channel_range, template_range)) =
                overlap(start + segment.start as isize, segment.len(), residual.len())
            else {
                continue;
            };
            let template = &shaped[segment.start + template_range.start..segment.start + template_range.end];
            let target = &mut residual[channel_range];

            let energy = dot(template, template);
            if energy < MIN_SEGMENT_ENERGY {
                continue;
            }
            *gain = dot(template, target) / energy;
            for (r, t) in target.iter_mut().zip(template) {
                *r -= *gain * t;
            }
        }

        SegmentGains {
            p: fitted[0],
            qrs: fitted[1],
            t: fitted[2],
        }
    }
}

/// Channel and window ranges where a window of `len` samples placed at
/// `start` overlaps a channel of `channel_len` samples
fn overlap(start: isize, len: usize, channel_len: usize) -> Option<(Range<usize>, Range<usize>)> {
    let end = start + len as isize;
    let lo = start.max(0);
    let hi = end.min(channel_len as isize);
    if lo >= hi {
        return None;
    }
    let channel_range = lo as usize..hi as usize;
    let window_range = (lo - start) as usize..(hi - start) as usize;
    Some((channel_range, window_range))
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Tukey window with cosine ramps over `fraction` of the length at each end
fn tukey(len: usize, fraction: f64) -> Vec<f64> {
    let ramp = (len as f64 * fraction).round() as usize;
    (0..len)
        .map(|i| {
            let edge = i.min(len - 1 - i);
            if edge >= ramp {
                1.0
            } else {
                0.5 * (1.0 - (std::f64::consts::PI * edge as f64 / ramp as f64).cos())
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "cancellation_tests.rs"]
mod tests;
