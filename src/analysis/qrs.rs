// QrsDetector - QRS localisation for the maternal and fetal passes
//
// One engine serves both passes; only the tuning differs. Energy method:
// 1. Zero-phase Butterworth band-pass around the QRS band
// 2. Five-point derivative, squared
// 3. Centred moving-window integration
// 4. Local maxima of the energy become candidates, offered in time order to
//    a DetectionPass (adaptive threshold, refractory rule, searchback)
// 5. Each accepted energy peak is placed on the input signal at the sample
//    of largest deviation from the local median
//
// Template method: an average beat is cut around the largest excursion of
// every one-second window, cross-correlated with the signal, and correlation
// maxima above a fraction of the strongest one are kept at least one
// refractory period apart.

use crate::config::{ms_to_samples, DetectionMethod, FetalDetectionConfig, MaternalDetectionConfig};
use crate::recording::PeakSet;

use super::preprocess::biquad::Biquad;
use super::preprocess::filtfilt;
use super::preprocess::fir::fft_convolve;
use super::threshold::{median, AdaptiveThreshold};

/// Gap factor (relative to the recent mean RR interval) that triggers searchback
const SEARCHBACK_GAP: f64 = 1.66;

/// Number of recent RR intervals averaged for searchback
const RR_HISTORY: usize = 8;

/// QRS detector tuned for one physiology
#[derive(Debug, Clone, PartialEq)]
pub struct QrsDetector {
    sample_rate: u32,
    refractory: usize,
    integration: usize,
    search_radius: usize,
    threshold_ratio: f64,
    searchback: bool,
    learning_segment: usize,
    method: DetectionMethod,
    /// Band-pass sections, applied forward and backward
    band: Vec<Biquad>,
    band_padding: usize,
    template_len: usize,
    template_threshold: f64,
}

impl QrsDetector {
    /// Detector for the maternal pass
    pub fn maternal(sample_rate: u32, config: &MaternalDetectionConfig) -> Self {
        Self {
            sample_rate,
            refractory: ms_to_samples(config.refractory_ms, sample_rate).max(1),
            integration: ms_to_samples(config.integration_ms, sample_rate).max(1),
            search_radius: ms_to_samples(config.search_radius_ms, sample_rate),
            threshold_ratio: config.threshold_ratio,
            searchback: config.searchback,
            learning_segment: sample_rate as usize,
            method: config.method,
            band: band_sections(config.band_low_hz, config.band_high_hz, sample_rate),
            band_padding: band_padding(config.band_low_hz, sample_rate),
            template_len: ms_to_samples(config.template_ms, sample_rate),
            template_threshold: config.template_threshold,
        }
    }

    /// Detector for the fetal pass
    pub fn fetal(sample_rate: u32, config: &FetalDetectionConfig) -> Self {
        Self {
            sample_rate,
            refractory: ms_to_samples(config.refractory_ms, sample_rate).max(1),
            integration: ms_to_samples(config.integration_ms, sample_rate).max(1),
            search_radius: ms_to_samples(config.search_radius_ms, sample_rate),
            threshold_ratio: config.threshold_ratio,
            searchback: config.searchback,
            learning_segment: sample_rate as usize,
            method: config.method,
            band: band_sections(config.band_low_hz, config.band_high_hz, sample_rate),
            band_padding: band_padding(config.band_low_hz, sample_rate),
            template_len: ms_to_samples(config.template_ms, sample_rate),
            template_threshold: config.template_threshold,
        }
    }

    /// Detect beats in one conditioned signal
    ///
    /// # Returns
    /// Strictly increasing peak indices, empty when nothing clears the threshold
    pub fn detect(&self, signal: &[f64]) -> PeakSet {
        let peaks = match self.method {
            DetectionMethod::Energy => self.detect_by_energy(signal),
            DetectionMethod::TemplateMatch => self.detect_by_template(signal),
        };

        tracing::debug!(
            "[QrsDetector] {:?}: {} peaks in {} samples (refractory {} samples)",
            self.method,
            peaks.len(),
            signal.len(),
            self.refractory
        );
        PeakSet::from_sorted(peaks)
    }

    fn detect_by_energy(&self, signal: &[f64]) -> Vec<usize> {
        let energy = emphasize(&self.band_limit(signal), self.integration);
        let mut pass = DetectionPass::new(
            self,
            AdaptiveThreshold::learn(&energy, self.learning_segment, self.threshold_ratio),
        );

        for index in local_maxima(&energy) {
            pass.offer(Candidate {
                index,
                energy: energy[index],
            });
        }

        pass.finish(signal.len())
            .into_iter()
            .map(|index| self.refine(signal, index))
            .collect()
    }

    fn detect_by_template(&self, signal: &[f64]) -> Vec<usize> {
        let Some(template) = beat_template(signal, self.sample_rate as usize, self.template_len)
        else {
            tracing::debug!("[QrsDetector] No complete beat window for a template");
            return Vec::new();
        };
        let correlation = template_correlation(signal, &template);
        let strongest = correlation.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !(strongest > 0.0) {
            return Vec::new();
        }

        let centre = template.len() / 2;
        spaced_maxima(&correlation, self.template_threshold * strongest, self.refractory)
            .into_iter()
            .map(|start| start + centre)
            .filter(|&peak| peak < signal.len())
            .collect()
    }

    /// Zero-phase band-pass ahead of the derivative
    fn band_limit(&self, signal: &[f64]) -> Vec<f64> {
        if signal.len() < 2 {
            return signal.to_vec();
        }
        let pad = self.band_padding.min(signal.len() - 1);
        self.band.iter().fold(signal.to_vec(), |x, section| {
            filtfilt(&x, pad, |y| section.filter(y))
        })
    }

    /// Place an energy peak on the signal itself
    fn refine(&self, signal: &[f64], index: usize) -> usize {
        let half = self.refractory / 2;
        let baseline = median(&signal[index.saturating_sub(half)..(index + half + 1).min(signal.len())]);

        let lo = index.saturating_sub(self.search_radius);
        let hi = (index + self.search_radius + 1).min(signal.len());
        signal[lo..hi]
            .iter()
            .enumerate()
            .fold((index, f64::MIN), |best, (offset, &x)| {
                let deviation = (x - baseline).abs();
                if deviation > best.1 {
                    (lo + offset, deviation)
                } else {
                    best
                }
            })
            .0
    }
}

/// High-pass then low-pass Butterworth sections. A cutoff at or beyond
/// Nyquist drops its section.
fn band_sections(low_hz: f64, high_hz: f64, sample_rate: u32) -> Vec<Biquad> {
    let fs = sample_rate as f64;
    let sections: Vec<Biquad> = [Biquad::highpass(low_hz, fs), Biquad::lowpass(high_hz, fs)]
        .into_iter()
        .flatten()
        .collect();
    if sections.len() < 2 {
        tracing::debug!(
            "[QrsDetector] QRS band {}-{} Hz partly outside (0, {}) Hz; {} section(s) kept",
            low_hz,
            high_hz,
            fs / 2.0,
            sections.len()
        );
    }
    sections
}

/// Reflection padding of about one period of the lower band edge
fn band_padding(low_hz: f64, sample_rate: u32) -> usize {
    if low_hz > 0.0 {
        (sample_rate as f64 / low_hz).ceil() as usize
    } else {
        sample_rate as usize
    }
}

/// Average of the windows centred on the largest absolute sample of every
/// whole `window`-sample segment; windows crossing an edge are skipped.
///
/// # Returns
/// `2 * (len / 2)` samples, `None` when no window fits
pub fn beat_template(signal: &[f64], window: usize, len: usize) -> Option<Vec<f64>> {
    let half = len / 2;
    if half == 0 || window == 0 {
        return None;
    }

    let mut sum = vec![0.0; 2 * half];
    let mut count = 0usize;
    for (segment_index, segment) in signal.chunks_exact(window).enumerate() {
        let offset = segment
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, x)| {
                if x.abs() > best.1 {
                    (i, x.abs())
                } else {
                    best
                }
            })
            .0;
        let peak = segment_index * window + offset;
        if peak < half || peak + half >= signal.len() {
            continue;
        }
        for (acc, x) in sum.iter_mut().zip(&signal[peak - half..peak + half]) {
            *acc += x;
        }
        count += 1;
    }

    if count == 0 {
        return None;
    }
    Some(sum.into_iter().map(|v| v / count as f64).collect())
}

/// `c[k] = sum_j x[k + j] * t[j] / |t|^2`, with `x` zero past its end
pub fn template_correlation(signal: &[f64], template: &[f64]) -> Vec<f64> {
    let energy: f64 = template.iter().map(|t| t * t).sum();
    if signal.is_empty() || !(energy > 0.0) {
        return vec![0.0; signal.len()];
    }
    let reversed: Vec<f64> = template.iter().rev().copied().collect();
    let full = fft_convolve(signal, &reversed);
    let lag = template.len() - 1;
    full[lag..lag + signal.len()]
        .iter()
        .map(|c| c / energy)
        .collect()
}

/// Local maxima at or above `height`, strongest first, each suppressing
/// weaker maxima closer than `distance` samples. Returned in time order.
fn spaced_maxima(values: &[f64], height: f64, distance: usize) -> Vec<usize> {
    let mut candidates: Vec<usize> = local_maxima(values)
        .into_iter()
        .filter(|&i| values[i] >= height)
        .collect();
    candidates.sort_by(|&a, &b| values[b].total_cmp(&values[a]).then(a.cmp(&b)));

    let mut kept: Vec<usize> = Vec::with_capacity(candidates.len());
    for index in candidates {
        if kept.iter().all(|&k| k.abs_diff(index) >= distance) {
            kept.push(index);
        }
    }
    kept.sort_unstable();
    kept
}

/// Detect maternal beats in one conditioned channel
pub fn detect_maternal(
    channel: &[f64],
    sample_rate: u32,
    config: &MaternalDetectionConfig,
) -> PeakSet {
    QrsDetector::maternal(sample_rate, config).detect(channel)
}

/// Detect fetal beats in the enhanced signal
///
/// When `maternal` is given and the guard is enabled, detections within
/// `maternal_guard_ms` of a maternal beat are dropped. This is a best-effort
/// filter for residual maternal energy, not a guarantee.
pub fn detect_fetal(
    enhanced: &[f64],
    sample_rate: u32,
    config: &FetalDetectionConfig,
    maternal: Option<&PeakSet>,
) -> PeakSet {
    let detected = QrsDetector::fetal(sample_rate, config).detect(enhanced);
    match maternal {
        Some(maternal) if config.suppress_maternal_coincident => {
            let guard = ms_to_samples(config.maternal_guard_ms, sample_rate);
            let kept = suppress_coincident(&detected, maternal, guard);
            if kept.len() < detected.len() {
                tracing::debug!(
                    "[QrsDetector] Dropped {} fetal peaks coinciding with maternal beats",
                    detected.len() - kept.len()
                );
            }
            kept
        }
        _ => detected,
    }
}

/// Remove peaks lying within `guard` samples of any reference peak
pub fn suppress_coincident(peaks: &PeakSet, reference: &PeakSet, guard: usize) -> PeakSet {
    let reference = reference.as_slice();
    let kept = peaks
        .iter()
        .filter(|&peak| {
            let next = reference.partition_point(|&r| r < peak);
            let near_next = reference.get(next).map_or(false, |&r| r - peak <= guard);
            let near_prev = next > 0 && peak - reference[next - 1] <= guard;
            !(near_next || near_prev)
        })
        .collect();
    PeakSet::from_sorted(kept)
}

/// Squared five-point derivative followed by centred moving-window integration
pub fn emphasize(signal: &[f64], window: usize) -> Vec<f64> {
    let n = signal.len();
    let mut squared = vec![0.0; n];
    if n >= 5 {
        for i in 2..n - 2 {
            let d = (2.0 * signal[i + 2] + signal[i + 1] - signal[i - 1] - 2.0 * signal[i - 2]) / 8.0;
            squared[i] = d * d;
        }
    }

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    let mut running = 0.0;
    for &value in &squared {
        running += value;
        prefix.push(running);
    }

    let window = window.max(1);
    let half = window / 2;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + window - half).min(n);
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

/// Indices where the energy rises into and does not rise out of
fn local_maxima(energy: &[f64]) -> Vec<usize> {
    if energy.len() < 3 {
        return Vec::new();
    }
    (1..energy.len() - 1)
        .filter(|&i| energy[i] > energy[i - 1] && energy[i] >= energy[i + 1])
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    index: usize,
    energy: f64,
}

/// State carried across candidates within one detection pass
struct DetectionPass<'a> {
    detector: &'a QrsDetector,
    threshold: AdaptiveThreshold,
    accepted: Vec<Candidate>,
    /// Candidates rejected since the last accepted peak
    pending: Vec<Candidate>,
}

impl<'a> DetectionPass<'a> {
    fn new(detector: &'a QrsDetector, threshold: AdaptiveThreshold) -> Self {
        Self {
            detector,
            threshold,
            accepted: Vec::new(),
            pending: Vec::new(),
        }
    }

    fn offer(&mut self, candidate: Candidate) {
        if self.detector.searchback {
            self.search_back(candidate.index);
        }

        if candidate.energy < self.threshold.level() {
            self.threshold.absorb_noise(candidate.energy);
            self.pending.push(candidate);
            return;
        }

        match self.accepted.last_mut() {
            Some(last) if candidate.index - last.index < self.detector.refractory => {
                // Same complex: keep the stronger candidate
                if candidate.energy > last.energy {
                    *last = candidate;
                }
            }
            _ => {
                self.threshold.absorb_signal(candidate.energy);
                self.accepted.push(candidate);
                self.pending.clear();
            }
        }
    }

    /// Recover the strongest rejected candidate when the gap up to `now`
    /// is too long for the recent rhythm
    fn search_back(&mut self, now: usize) {
        loop {
            let Some(rr) = self.recent_rr() else {
                return;
            };
            let Some(last) = self.accepted.last().map(|c| c.index) else {
                return;
            };
            if ((now - last) as f64) <= SEARCHBACK_GAP * rr {
                return;
            }

            let floor = self.threshold.level() / 2.0;
            let earliest = last + self.detector.refractory;
            let recovered = self
                .pending
                .iter()
                .filter(|c| c.index >= earliest && c.energy > floor)
                .copied()
                .max_by(|a, b| a.energy.total_cmp(&b.energy));

            let Some(recovered) = recovered else {
                return;
            };
            tracing::debug!(
                "[QrsDetector] Searchback recovered peak at {} (gap {} samples)",
                recovered.index,
                now - last
            );
            self.threshold.absorb_searchback(recovered.energy);
            self.accepted.push(recovered);
            self.pending.retain(|c| c.index > recovered.index);
        }
    }

    fn recent_rr(&self) -> Option<f64> {
        if self.accepted.len() < 2 {
            return None;
        }
        let start = self.accepted.len().saturating_sub(RR_HISTORY + 1);
        let recent = &self.accepted[start..];
        let span = recent[recent.len() - 1].index - recent[0].index;
        Some(span as f64 / (recent.len() - 1) as f64)
    }

    fn finish(mut self, signal_len: usize) -> Vec<usize> {
        if self.detector.searchback {
            self.search_back(signal_len);
        }
        self.accepted.into_iter().map(|c| c.index).collect()
    }
}
