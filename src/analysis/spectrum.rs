// Spectrum module - whole-signal frequency-domain helpers
//
// Used by the channel combiner to estimate how much of a residual's energy
// sits in the fetal QRS band and to judge channel polarity on that band
// alone, and by `Recording::resample`.

use rustfft::{num_complex::Complex, FftPlanner};

/// One-sided power spectrum of the mean-removed signal
///
/// The signal is zero-padded to the next power of two `N`; bin `k` covers
/// frequency `k * fs / N`.
///
/// # Returns
/// `N / 2 + 1` power values, empty for an empty signal
pub fn power_spectrum(signal: &[f64]) -> Vec<f64> {
    if signal.is_empty() {
        return Vec::new();
    }
    let fft_size = signal.len().next_power_of_two();
    let mean = signal.iter().sum::<f64>() / signal.len() as f64;

    let mut buffer: Vec<Complex<f64>> = signal
        .iter()
        .map(|&x| Complex::new(x - mean, 0.0))
        .collect();
    buffer.resize(fft_size, Complex::new(0.0, 0.0));

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(fft_size).process(&mut buffer);

    buffer[..fft_size / 2 + 1].iter().map(|c| c.norm_sqr()).collect()
}

/// Fraction of spectral energy within `[low_hz, high_hz]`
///
/// # Returns
/// Value in [0, 1]; 0 when the signal carries no energy
pub fn band_energy_fraction(signal: &[f64], sample_rate: u32, low_hz: f64, high_hz: f64) -> f64 {
    let spectrum = power_spectrum(signal);
    let total: f64 = spectrum.iter().sum();
    if !(total > 0.0) {
        return 0.0;
    }

    let fft_size = signal.len().next_power_of_two();
    let bin_hz = sample_rate as f64 / fft_size as f64;
    let in_band: f64 = spectrum
        .iter()
        .enumerate()
        .filter(|(k, _)| {
            let freq = *k as f64 * bin_hz;
            freq >= low_hz && freq <= high_hz
        })
        .map(|(_, p)| p)
        .sum();

    in_band / total
}

/// Zero-phase band-pass by zeroing every bin outside `[low_hz, high_hz]`
///
/// The transform runs at the exact signal length, so the output is as long
/// as the input and carries no padding artefacts.
pub fn band_pass(signal: &[f64], sample_rate: u32, low_hz: f64, high_hz: f64) -> Vec<f64> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let mut buffer: Vec<Complex<f64>> = signal.iter().map(|&x| Complex::new(x, 0.0)).collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(n).process(&mut buffer);

    let bin_hz = sample_rate as f64 / n as f64;
    for (k, bin) in buffer.iter_mut().enumerate() {
        let freq = k.min(n - k) as f64 * bin_hz;
        if freq < low_hz || freq > high_hz {
            *bin = Complex::new(0.0, 0.0);
        }
    }

    planner.plan_fft_inverse(n).process(&mut buffer);
    let scale = 1.0 / n as f64;
    buffer.iter().map(|c| c.re * scale).collect()
}

/// Fourier resampling of one channel to `num` samples
///
/// The spectrum is truncated or zero-extended around Nyquist. When the
/// shorter of the two lengths is even, its Nyquist bin is doubled on
/// decimation and halved on interpolation so the energy stays split
/// symmetrically.
///
/// # Returns
/// `num` samples, empty when either length is zero
pub fn resample(signal: &[f64], num: usize) -> Vec<f64> {
    let n = signal.len();
    if n == 0 || num == 0 {
        return Vec::new();
    }

    let mut planner = FftPlanner::<f64>::new();
    let mut spectrum: Vec<Complex<f64>> = signal.iter().map(|&x| Complex::new(x, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut spectrum);

    // One-sided spectrum of the output
    let shared = n.min(num);
    let mut half = vec![Complex::new(0.0, 0.0); num / 2 + 1];
    half[..shared / 2 + 1].copy_from_slice(&spectrum[..shared / 2 + 1]);
    if shared % 2 == 0 {
        if num < n {
            half[shared / 2] *= 2.0;
        } else if n < num {
            half[shared / 2] *= 0.5;
        }
    }

    // Hermitian completion; the DC and even-length Nyquist bins stay real
    let mut full = vec![Complex::new(0.0, 0.0); num];
    full[0] = Complex::new(half[0].re, 0.0);
    for k in 1..=(num - 1) / 2 {
        full[k] = half[k];
        full[num - k] = half[k].conj();
    }
    if num % 2 == 0 {
        full[num / 2] = Complex::new(half[num / 2].re, 0.0);
    }

    planner.plan_fft_inverse(num).process(&mut full);
    let scale = 1.0 / n as f64;
    full.iter().map(|c| c.re * scale).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn tone(freq_hz: f64, sample_rate: u32, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * PI * freq_hz * i as f64 / sample_rate as f64).sin())
            .collect()
    }

    #[test]
    fn test_power_spectrum_length() {
        assert_eq!(power_spectrum(&vec![1.0; 1000]).len(), 513);
        assert!(power_spectrum(&[]).is_empty());
    }

    #[test]
    fn test_constant_has_no_band_energy() {
        assert_eq!(band_energy_fraction(&vec![2.5; 512], 500, 5.0, 45.0), 0.0);
    }

    #[test]
    fn test_tone_inside_and_outside_band() {
        // 1024 samples at 1024 Hz puts every integer frequency on a bin
        let inside = band_energy_fraction(&tone(20.0, 1024, 1024), 1024, 5.0, 45.0);
        assert!(inside > 0.99, "in-band fraction {}", inside);

        let outside = band_energy_fraction(&tone(100.0, 1024, 1024), 1024, 5.0, 45.0);
        assert!(outside < 0.01, "out-of-band fraction {}", outside);
    }

    #[test]
    fn test_band_pass_keeps_in_band_tone_only() {
        let mixed: Vec<f64> = tone(20.0, 1000, 1000)
            .iter()
            .zip(tone(2.0, 1000, 1000).iter())
            .map(|(a, b)| a + 3.0 * b)
            .collect();
        let filtered = band_pass(&mixed, 1000, 5.0, 45.0);
        let expected = tone(20.0, 1000, 1000);
        for (y, e) in filtered.iter().zip(&expected) {
            assert!((y - e).abs() < 1e-9);
        }
        assert!(band_pass(&[], 1000, 5.0, 45.0).is_empty());
    }

    #[test]
    fn test_resample_periodic_tone() {
        // Two whole cycles in one second, so the tone is exactly band-limited
        let signal = tone(2.0, 1000, 1000);

        let down = resample(&signal, 500);
        assert_eq!(down.len(), 500);
        for (y, e) in down.iter().zip(&tone(2.0, 500, 500)) {
            assert!((y - e).abs() < 1e-9, "{} vs {}", y, e);
        }

        let up = resample(&signal, 2000);
        assert_eq!(up.len(), 2000);
        for (y, e) in up.iter().zip(&tone(2.0, 2000, 2000)) {
            assert!((y - e).abs() < 1e-9, "{} vs {}", y, e);
        }
    }

    #[test]
    fn test_resample_keeps_constant_level() {
        let resampled = resample(&[1.5; 301], 97);
        assert_eq!(resampled.len(), 97);
        assert!(resampled.iter().all(|y| (y - 1.5).abs() < 1e-9));
        assert!(resample(&[], 10).is_empty());
    }
}
