//! Deterministic synthetic abdominal recordings.
//!
//! Each channel mixes a maternal and a fetal complex train with its own
//! projection gains, plus seeded white Gaussian noise. A complex train is a
//! sinusoidal rhythm whose crests carry a Gaussian QRS-like pulse, so beat
//! times are known exactly and the recording can be scored against them.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::PipelineError;
use crate::recording::{GroundTruth, Recording};

/// Pulses are rendered out to this many standard deviations
const RENDER_SIGMAS: f64 = 6.0;

/// Periodic train of Gaussian complexes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexTrain {
    pub rate_bpm: f64,
    pub amplitude: f64,
    /// Gaussian standard deviation in seconds
    pub width_s: f64,
    /// Time of the first crest in seconds
    pub phase_s: f64,
}

impl ComplexTrain {
    /// Crest times within `[0, duration_s)`
    pub fn crest_times(&self, duration_s: f64) -> Vec<f64> {
        let period = 60.0 / self.rate_bpm;
        (0..)
            .map(|k| self.phase_s + k as f64 * period)
            .take_while(|&t| t < duration_s)
            .filter(|&t| t >= 0.0)
            .collect()
    }

    /// Render the train at unit projection gain
    pub fn render(&self, sample_rate: u32, len: usize) -> Vec<f64> {
        let fs = sample_rate as f64;
        let sigma = self.width_s * fs;
        let reach = RENDER_SIGMAS * sigma;
        let mut samples = vec![0.0; len];

        for crest in self.crest_times(len as f64 / fs) {
            let centre = crest * fs;
            let lo = (centre - reach).ceil().max(0.0) as usize;
            let hi = ((centre + reach).floor().max(0.0) as usize + 1).min(len);
            for (i, sample) in samples.iter_mut().enumerate().take(hi).skip(lo) {
                let z = (i as f64 - centre) / sigma;
                *sample += self.amplitude * (-0.5 * z * z).exp();
            }
        }
        samples
    }
}

/// Full description of a synthetic recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticScenario {
    pub sample_rate: u32,
    pub duration_s: f64,
    pub maternal: ComplexTrain,
    pub fetal: ComplexTrain,
    /// Maternal projection gain per channel
    pub maternal_gains: Vec<f64>,
    /// Fetal projection gain per channel
    pub fetal_gains: Vec<f64>,
    /// Standard deviation of the additive noise
    pub noise_std: f64,
    pub seed: u64,
}

impl Default for SyntheticScenario {
    /// Four channels, 60 s at 1 kHz: maternal 70 bpm at amplitude 1.0,
    /// fetal 140 bpm at amplitude 0.1, noise 0.01.
    ///
    /// The fetal rhythm is offset so every fetal beat falls between maternal
    /// complexes (275 ms after one, about 154 ms before the next).
    fn default() -> Self {
        Self {
            sample_rate: 1000,
            duration_s: 60.0,
            maternal: ComplexTrain {
                rate_bpm: 70.0,
                amplitude: 1.0,
                width_s: 0.015,
                phase_s: 0.3,
            },
            fetal: ComplexTrain {
                rate_bpm: 140.0,
                amplitude: 0.1,
                width_s: 0.008,
                phase_s: 0.575 - 60.0 / 140.0,
            },
            maternal_gains: vec![1.0, 0.8, -0.7, 1.2],
            fetal_gains: vec![1.0, 1.2, 0.8, 1.1],
            noise_std: 0.01,
            seed: 42,
        }
    }
}

/// Synthetic recording plus its exact beat schedules
#[derive(Debug, Clone)]
pub struct SyntheticRecording {
    pub recording: Recording,
    pub fetal_truth: GroundTruth,
    pub maternal_truth: GroundTruth,
}

/// Build the recording described by `scenario`
///
/// # Errors
/// `ChannelCountMismatch` when the gain vectors differ in length, or any
/// error from [`Recording::new`]
pub fn generate(scenario: &SyntheticScenario) -> Result<SyntheticRecording, PipelineError> {
    if scenario.fetal_gains.len() != scenario.maternal_gains.len() {
        return Err(PipelineError::ChannelCountMismatch {
            expected: scenario.maternal_gains.len(),
            actual: scenario.fetal_gains.len(),
        });
    }

    let fs = scenario.sample_rate;
    let len = (scenario.duration_s * fs as f64).round() as usize;
    let maternal = scenario.maternal.render(fs, len);
    let fetal = scenario.fetal.render(fs, len);
    let mut rng = StdRng::seed_from_u64(scenario.seed);

    let channels: Vec<Vec<f64>> = scenario
        .maternal_gains
        .iter()
        .zip(scenario.fetal_gains.iter())
        .map(|(&gm, &gf)| {
            maternal
                .iter()
                .zip(fetal.iter())
                .map(|(m, f)| gm * m + gf * f + scenario.noise_std * gaussian(&mut rng))
                .collect()
        })
        .collect();

    let duration = len as f64 / fs as f64;
    Ok(SyntheticRecording {
        recording: Recording::new(fs, channels)?,
        fetal_truth: GroundTruth::from_seconds(&scenario.fetal.crest_times(duration), fs),
        maternal_truth: GroundTruth::from_seconds(&scenario.maternal.crest_times(duration), fs),
    })
}

/// Standard normal sample (Box-Muller)
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1 = 1.0 - rng.gen::<f64>();
    let u2 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
