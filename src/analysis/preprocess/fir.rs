// FIR module - Linear-phase high-pass design and FFT convolution
//
// The baseline filter is long (around a second of samples), so convolution
// runs in the frequency domain instead of sample by sample.

use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;

/// Design a high-pass FIR kernel by the windowed-sinc method.
///
/// The kernel is a unit impulse minus a Hamming-windowed low-pass normalised
/// to unity DC gain, so constant input maps to zero.
///
/// # Arguments
/// * `num_taps` - Kernel length (odd)
/// * `cutoff_hz` - Transition frequency
/// * `sample_rate` - Sampling rate in Hz
pub fn highpass_kernel(num_taps: usize, cutoff_hz: f64, sample_rate: f64) -> Vec<f64> {
    let mid = (num_taps - 1) / 2;
    let fc = cutoff_hz / sample_rate;
    let denom = (num_taps - 1).max(1) as f64;

    let mut lowpass: Vec<f64> = (0..num_taps)
        .map(|k| {
            let x = k as f64 - mid as f64;
            let sinc = if x == 0.0 {
                1.0
            } else {
                (2.0 * PI * fc * x).sin() / (2.0 * PI * fc * x)
            };
            let hamming = 0.54 - 0.46 * (2.0 * PI * k as f64 / denom).cos();
            2.0 * fc * sinc * hamming
        })
        .collect();

    let gain: f64 = lowpass.iter().sum();
    if gain != 0.0 {
        lowpass.iter_mut().for_each(|h| *h /= gain);
    }

    let mut kernel: Vec<f64> = lowpass.iter().map(|h| -h).collect();
    kernel[mid] += 1.0;
    kernel
}

/// Full linear convolution of `signal` with `kernel` via FFT.
///
/// Output length is `signal.len() + kernel.len() - 1`.
pub fn fft_convolve(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    if signal.is_empty() || kernel.is_empty() {
        return Vec::new();
    }
    let out_len = signal.len() + kernel.len() - 1;
    let fft_size = out_len.next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(fft_size);
    let inverse = planner.plan_fft_inverse(fft_size);

    let to_buffer = |data: &[f64]| -> Vec<Complex<f64>> {
        let mut buffer = vec![Complex::new(0.0, 0.0); fft_size];
        for (slot, &value) in buffer.iter_mut().zip(data) {
            slot.re = value;
        }
        buffer
    };

    let mut a = to_buffer(signal);
    let mut b = to_buffer(kernel);
    forward.process(&mut a);
    forward.process(&mut b);
    for (x, y) in a.iter_mut().zip(b.iter()) {
        *x *= *y;
    }
    inverse.process(&mut a);

    let scale = 1.0 / fft_size as f64;
    a[..out_len].iter().map(|c| c.re * scale).collect()
}

/// Causal FIR filtering starting from the steady state of `x[0]`.
///
/// Equivalent to filtering a signal preceded by an infinite run of `x[0]`.
pub fn filter_steady(kernel: &[f64], x: &[f64]) -> Vec<f64> {
    let Some(&first) = x.first() else {
        return Vec::new();
    };
    let history = kernel.len() - 1;
    let mut padded = Vec::with_capacity(history + x.len());
    padded.resize(history, first);
    padded.extend_from_slice(x);

    let full = fft_convolve(&padded, kernel);
    full[history..history + x.len()].to_vec()
}
