//! Configuration management for pipeline parameter tuning
//!
//! This module provides configuration loading from JSON files, enabling
//! calibration against a dataset without recompilation. Every field has a
//! default, so a config file only needs to name the values it changes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::PipelineError;

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub preprocessing: PreprocessingConfig,
    pub maternal_detection: MaternalDetectionConfig,
    pub cancellation: CancellationConfig,
    pub combination: CombinationConfig,
    pub fetal_detection: FetalDetectionConfig,
    pub scoring: ScoringConfig,
}

/// Baseline wander and powerline interference removal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// Local mains frequency, 50 or 60 Hz
    pub powerline_freq_hz: u32,
    /// Notch quality factor (centre frequency / bandwidth)
    pub notch_quality: f64,
    /// High-pass cutoff for baseline wander removal
    pub baseline_cutoff_hz: f64,
    /// FIR length of the baseline filter (odd)
    pub baseline_num_taps: usize,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            powerline_freq_hz: 50,
            notch_quality: 30.0,
            baseline_cutoff_hz: 0.5,
            baseline_num_taps: 1001,
        }
    }
}

/// How a QRS detector locates beats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Band-pass, squared derivative, integration, adaptive threshold
    Energy,
    /// Cross-correlation against an averaged beat template
    TemplateMatch,
}

/// Maternal QRS detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaternalDetectionConfig {
    /// Minimum interval between two accepted maternal beats
    pub refractory_ms: f64,
    /// Moving-window integration length for QRS energy
    pub integration_ms: f64,
    /// Half-width of the window used to place the peak on the signal
    pub search_radius_ms: f64,
    /// Threshold position between noise level (0.0) and signal level (1.0)
    pub threshold_ratio: f64,
    /// Recover missed beats after long gaps
    pub searchback: bool,
    pub method: DetectionMethod,
    /// QRS band kept ahead of the derivative (energy method)
    pub band_low_hz: f64,
    pub band_high_hz: f64,
    /// Beat template length (template method)
    pub template_ms: f64,
    /// Correlation threshold as a fraction of the strongest match (template method)
    pub template_threshold: f64,
}

impl Default for MaternalDetectionConfig {
    fn default() -> Self {
        Self {
            refractory_ms: 300.0,
            integration_ms: 100.0,
            search_radius_ms: 50.0,
            threshold_ratio: 0.25,
            searchback: true,
            method: DetectionMethod::Energy,
            band_low_hz: 5.0,
            band_high_hz: 15.0,
            template_ms: 100.0,
            template_threshold: 0.4,
        }
    }
}

/// Fetal QRS detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetalDetectionConfig {
    pub refractory_ms: f64,
    pub integration_ms: f64,
    pub search_radius_ms: f64,
    pub threshold_ratio: f64,
    pub searchback: bool,
    /// Drop fetal candidates that coincide with a maternal beat
    pub suppress_maternal_coincident: bool,
    /// Half-width of the coincidence window around each maternal peak
    pub maternal_guard_ms: f64,
    pub method: DetectionMethod,
    pub band_low_hz: f64,
    pub band_high_hz: f64,
    pub template_ms: f64,
    pub template_threshold: f64,
}

impl Default for FetalDetectionConfig {
    fn default() -> Self {
        Self {
            refractory_ms: 350.0,
            integration_ms: 50.0,
            search_radius_ms: 25.0,
            threshold_ratio: 0.3,
            searchback: true,
            suppress_maternal_coincident: true,
            maternal_guard_ms: 20.0,
            method: DetectionMethod::Energy,
            band_low_hz: 10.0,
            band_high_hz: 40.0,
            template_ms: 50.0,
            template_threshold: 0.4,
        }
    }
}

/// Maternal template cancellation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CancellationConfig {
    /// Exponential update weight of the newest beat, in (0, 1]
    pub template_update_rate: f64,
    pub p_wave_ms: f64,
    pub qrs_ms: f64,
    pub t_wave_ms: f64,
    /// Largest alignment shift tried per beat
    pub max_lag_ms: f64,
    /// Number of leading beats averaged into the initial template
    pub seed_beats: usize,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            template_update_rate: 0.1,
            p_wave_ms: 80.0,
            qrs_ms: 100.0,
            t_wave_ms: 200.0,
            max_lag_ms: 10.0,
            seed_beats: 5,
        }
    }
}

/// How residual channels are fused into one signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineStrategy {
    /// Weighted sum, weights from fetal-band energy over residual variance
    SnrWeighted,
    /// Projection on the dominant principal component
    PrincipalComponent,
}

/// Channel combination parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinationConfig {
    pub strategy: CombineStrategy,
    pub fetal_band_low_hz: f64,
    pub fetal_band_high_hz: f64,
    /// Flip channels whose fetal-band content is anti-correlated with the
    /// strongest channel's, outside maternal complexes
    pub align_polarity: bool,
}

impl Default for CombinationConfig {
    fn default() -> Self {
        Self {
            strategy: CombineStrategy::SnrWeighted,
            fetal_band_low_hz: 5.0,
            fetal_band_high_hz: 45.0,
            align_polarity: true,
        }
    }
}

/// Accuracy scoring parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Maximum offset between a detection and its reference beat
    pub match_tolerance_ms: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            match_tolerance_ms: 50.0,
        }
    }
}

fn require(condition: bool, reason: impl FnOnce() -> String) -> Result<(), PipelineError> {
    if condition {
        Ok(())
    } else {
        Err(PipelineError::invalid_config(reason()))
    }
}

fn require_positive(name: &str, value: f64) -> Result<(), PipelineError> {
    require(value.is_finite() && value > 0.0, || {
        format!("{} must be positive (got {})", name, value)
    })
}

/// Checks shared by the maternal and fetal detector sections
struct DetectorLimits<'a> {
    pass: &'a str,
    refractory_ms: f64,
    integration_ms: f64,
    search_radius_ms: f64,
    threshold_ratio: f64,
    band_low_hz: f64,
    band_high_hz: f64,
    template_ms: f64,
    template_threshold: f64,
}

impl DetectorLimits<'_> {
    fn check(&self) -> Result<(), PipelineError> {
        let pass = self.pass;
        require_positive(&format!("{} refractory_ms", pass), self.refractory_ms)?;
        require_positive(&format!("{} integration_ms", pass), self.integration_ms)?;
        require_positive(&format!("{} search_radius_ms", pass), self.search_radius_ms)?;
        // Refined peaks move at most one radius each, so two beats a
        // refractory period apart can never land on each other
        require(2.0 * self.search_radius_ms < self.refractory_ms, || {
            format!(
                "{} search_radius_ms ({}) must be less than half of refractory_ms ({})",
                pass, self.search_radius_ms, self.refractory_ms
            )
        })?;
        require(
            self.threshold_ratio > 0.0 && self.threshold_ratio < 1.0,
            || format!("{} threshold_ratio must lie in (0, 1)", pass),
        )?;
        require(
            self.band_low_hz > 0.0 && self.band_high_hz > self.band_low_hz,
            || format!("{} QRS band must satisfy 0 < low < high", pass),
        )?;
        require_positive(&format!("{} template_ms", pass), self.template_ms)?;
        require(
            self.template_threshold > 0.0 && self.template_threshold <= 1.0,
            || format!("{} template_threshold must lie in (0, 1]", pass),
        )
    }
}

impl PipelineConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or the defaults when the file is missing
    /// or its JSON is invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Parse configuration from a JSON string without falling back
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(json).map_err(|err| PipelineError::invalid_config(err.to_string()))
    }

    /// Check every value against its domain
    pub fn validate(&self) -> Result<(), PipelineError> {
        let pre = &self.preprocessing;
        require(matches!(pre.powerline_freq_hz, 50 | 60), || {
            format!(
                "powerline_freq_hz must be 50 or 60 (got {})",
                pre.powerline_freq_hz
            )
        })?;
        require_positive("notch_quality", pre.notch_quality)?;
        require_positive("baseline_cutoff_hz", pre.baseline_cutoff_hz)?;
        require(
            pre.baseline_num_taps >= 3 && pre.baseline_num_taps % 2 == 1,
            || {
                format!(
                    "baseline_num_taps must be odd and >= 3 (got {})",
                    pre.baseline_num_taps
                )
            },
        )?;

        let maternal = &self.maternal_detection;
        DetectorLimits {
            pass: "maternal",
            refractory_ms: maternal.refractory_ms,
            integration_ms: maternal.integration_ms,
            search_radius_ms: maternal.search_radius_ms,
            threshold_ratio: maternal.threshold_ratio,
            band_low_hz: maternal.band_low_hz,
            band_high_hz: maternal.band_high_hz,
            template_ms: maternal.template_ms,
            template_threshold: maternal.template_threshold,
        }
        .check()?;

        let fetal = &self.fetal_detection;
        DetectorLimits {
            pass: "fetal",
            refractory_ms: fetal.refractory_ms,
            integration_ms: fetal.integration_ms,
            search_radius_ms: fetal.search_radius_ms,
            threshold_ratio: fetal.threshold_ratio,
            band_low_hz: fetal.band_low_hz,
            band_high_hz: fetal.band_high_hz,
            template_ms: fetal.template_ms,
            template_threshold: fetal.template_threshold,
        }
        .check()?;
        require(
            fetal.maternal_guard_ms.is_finite() && fetal.maternal_guard_ms >= 0.0,
            || "maternal_guard_ms must be >= 0".to_string(),
        )?;

        let cancel = &self.cancellation;
        require(
            cancel.template_update_rate > 0.0 && cancel.template_update_rate <= 1.0,
            || {
                format!(
                    "template_update_rate must lie in (0, 1] (got {})",
                    cancel.template_update_rate
                )
            },
        )?;
        require_positive("qrs_ms", cancel.qrs_ms)?;
        require(
            cancel.p_wave_ms >= 0.0 && cancel.t_wave_ms >= 0.0 && cancel.max_lag_ms >= 0.0,
            || "p_wave_ms, t_wave_ms and max_lag_ms must be >= 0".to_string(),
        )?;
        require(cancel.seed_beats >= 1, || {
            "seed_beats must be at least 1".to_string()
        })?;

        let combine = &self.combination;
        require(
            combine.fetal_band_low_hz >= 0.0
                && combine.fetal_band_high_hz > combine.fetal_band_low_hz,
            || "fetal band must satisfy 0 <= low < high".to_string(),
        )?;

        require_positive("match_tolerance_ms", self.scoring.match_tolerance_ms)?;
        Ok(())
    }
}

/// Convert a duration in milliseconds to whole samples (truncating)
pub(crate) fn ms_to_samples(ms: f64, sample_rate: u32) -> usize {
    (ms * sample_rate as f64 / 1000.0) as usize
}
