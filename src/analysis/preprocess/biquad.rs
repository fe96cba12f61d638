// Biquad module - Second-order IIR sections
//
// Notch: zeros on the unit circle at the mains frequency, poles just inside
// at the same angle, bandwidth set by the quality factor.
// Low-pass / high-pass: Butterworth (Q = 1/sqrt(2)) sections used to
// band-limit signals ahead of QRS energy detection.

use std::f64::consts::PI;

/// Second-order IIR section with normalised denominator (`a0 = 1`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Biquad {
    /// Design a notch at `freq_hz` with quality factor `quality`.
    ///
    /// Returns `None` when the notch frequency is not strictly inside
    /// (0, Nyquist).
    pub fn notch(freq_hz: f64, quality: f64, sample_rate: f64) -> Option<Self> {
        let w0 = 2.0 * freq_hz / sample_rate;
        if !(w0 > 0.0 && w0 < 1.0) || quality <= 0.0 {
            return None;
        }

        let bw = (w0 / quality) * PI;
        let w0 = w0 * PI;
        let beta = (bw / 2.0).tan();
        let gain = 1.0 / (1.0 + beta);
        let cos_w0 = w0.cos();

        Some(Self {
            b: [gain, -2.0 * gain * cos_w0, gain],
            a: [1.0, -2.0 * gain * cos_w0, 2.0 * gain - 1.0],
        })
    }

    /// Second-order Butterworth low-pass at `cutoff_hz`.
    ///
    /// Returns `None` unless the cutoff is strictly inside (0, Nyquist).
    pub fn lowpass(cutoff_hz: f64, sample_rate: f64) -> Option<Self> {
        let (cos_w0, alpha) = Self::butterworth_terms(cutoff_hz, sample_rate)?;
        let side = (1.0 - cos_w0) / 2.0;
        Some(Self::normalised(
            [side, 1.0 - cos_w0, side],
            [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
        ))
    }

    /// Second-order Butterworth high-pass at `cutoff_hz`.
    ///
    /// Returns `None` unless the cutoff is strictly inside (0, Nyquist).
    pub fn highpass(cutoff_hz: f64, sample_rate: f64) -> Option<Self> {
        let (cos_w0, alpha) = Self::butterworth_terms(cutoff_hz, sample_rate)?;
        let side = (1.0 + cos_w0) / 2.0;
        Some(Self::normalised(
            [side, -(1.0 + cos_w0), side],
            [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
        ))
    }

    fn butterworth_terms(cutoff_hz: f64, sample_rate: f64) -> Option<(f64, f64)> {
        let w0 = 2.0 * cutoff_hz / sample_rate;
        if !(w0 > 0.0 && w0 < 1.0) {
            return None;
        }
        let w0 = w0 * PI;
        Some((w0.cos(), w0.sin() * std::f64::consts::FRAC_1_SQRT_2))
    }

    fn normalised(b: [f64; 3], a: [f64; 3]) -> Self {
        let a0 = a[0];
        Self {
            b: b.map(|v| v / a0),
            a: a.map(|v| v / a0),
        }
    }

    /// Internal state reached after an infinitely long unit input
    fn steady_state(&self) -> [f64; 2] {
        let [b0, b1, b2] = self.b;
        let [_, a1, a2] = self.a;
        let dc_gain = (b0 + b1 + b2) / (1.0 + a1 + a2);
        let z1 = b2 - a2 * dc_gain;
        let z0 = b1 - a1 * dc_gain + z1;
        [z0, z1]
    }

    /// Direct form II transposed filtering, initialised at the steady state
    /// of the first sample.
    pub fn filter(&self, x: &[f64]) -> Vec<f64> {
        let Some(&first) = x.first() else {
            return Vec::new();
        };
        let [b0, b1, b2] = self.b;
        let [_, a1, a2] = self.a;
        let [mut z0, mut z1] = self.steady_state().map(|z| z * first);

        x.iter()
            .map(|&sample| {
                let y = b0 * sample + z0;
                z0 = b1 * sample - a1 * y + z1;
                z1 = b2 * sample - a2 * y;
                y
            })
            .collect()
    }
}
