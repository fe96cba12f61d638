use super::*;
use crate::testing::synthetic::ComplexTrain;
use rand::{rngs::StdRng, Rng, SeedableRng};

const FS: u32 = 1000;

fn maternal_train() -> ComplexTrain {
    ComplexTrain {
        rate_bpm: 70.0,
        amplitude: 1.0,
        width_s: 0.015,
        phase_s: 0.3,
    }
}

/// Rounded crest positions of a train over `len` samples
fn crest_peaks(train: &ComplexTrain, len: usize) -> PeakSet {
    let indices = train
        .crest_times(len as f64 / FS as f64)
        .iter()
        .map(|t| (t * FS as f64).round() as usize)
        .filter(|&i| i < len)
        .collect();
    PeakSet::from_indices(indices, len).unwrap()
}

fn energy(x: &[f64]) -> f64 {
    x.iter().map(|v| v * v).sum()
}

fn create_canceller() -> MaternalCanceller {
    MaternalCanceller::new(FS, &CancellationConfig::default())
}

#[test]
fn test_layout_from_default_config() {
    let layout = create_canceller().layout();
    assert_eq!(layout.p_len, 80);
    assert_eq!(layout.qrs_len, 100);
    assert_eq!(layout.t_len, 200);
    assert_eq!(layout.before(), 130);
    assert_eq!(layout.after(), 249);
    assert_eq!(layout.len(), 380);
    assert_eq!(layout.segments(), [0..80, 80..180, 180..380]);
}

#[test]
fn test_qrs_span_covers_lag_search() {
    let canceller = create_canceller();
    assert_eq!(canceller.qrs_span(500, 10_000), 440..561);
    assert_eq!(canceller.qrs_span(30, 10_000), 0..91);
    assert_eq!(canceller.qrs_span(9990, 10_000), 9930..10_000);
}

#[test]
fn test_tukey_ramps() {
    let window = tukey(20, 0.1);
    assert_eq!(window[0], 0.0);
    assert_eq!(window[19], 0.0);
    assert!((window[1] - 0.5).abs() < 1e-12);
    assert!(window[2..18].iter().all(|&w| w == 1.0));
}

#[test]
fn test_template_seed_and_update() {
    let a = [1.0, 2.0, 3.0];
    let b = [3.0, 2.0, 1.0];
    let mut template = MaternalTemplate::seed(&[&a, &b]).unwrap();
    assert_eq!(template.waveform(), &[2.0, 2.0, 2.0]);
    assert_eq!(template.beats_absorbed(), 2);

    template.update(&[4.0, 2.0, 0.0], 0.5);
    assert_eq!(template.waveform(), &[3.0, 2.0, 1.0]);
    assert_eq!(template.beats_absorbed(), 3);

    assert!(MaternalTemplate::seed(&[]).is_none());
}

#[test]
fn test_empty_peaks_leave_channel_unchanged() {
    let channel: Vec<f64> = (0..2000).map(|i| (i as f64 * 0.01).sin()).collect();
    let residual = create_canceller().cancel(&channel, &PeakSet::empty()).unwrap();
    assert_eq!(residual, channel);
}

#[test]
fn test_peak_outside_channel_rejected() {
    let channel = vec![0.0; 1000];
    let peaks = PeakSet::from_indices(vec![500, 1500], 2000).unwrap();
    assert!(matches!(
        create_canceller().cancel(&channel, &peaks),
        Err(PipelineError::InvalidPeaks { .. })
    ));
}

#[test]
fn test_channel_shorter_than_window_passes_through() {
    let channel: Vec<f64> = (0..300).map(|i| i as f64).collect();
    let peaks = PeakSet::from_indices(vec![150], 300).unwrap();
    let cancellation = create_canceller().cancel_detailed(&channel, &peaks).unwrap();
    assert_eq!(cancellation.residual, channel);
    assert!(cancellation.template.is_none());
}

#[test]
fn test_suppresses_stationary_maternal_complex() {
    let len = 20_000;
    let train = maternal_train();
    let channel = train.render(FS, len);
    let peaks = crest_peaks(&train, len);

    let residual = create_canceller().cancel(&channel, &peaks).unwrap();
    assert_eq!(residual.len(), len);
    let ratio = energy(&residual) / energy(&channel);
    assert!(ratio < 0.01, "residual energy ratio {}", ratio);
}

#[test]
fn test_tracks_slow_amplitude_drift() {
    let len = 30_000;
    let train = maternal_train();
    let peaks = crest_peaks(&train, len);
    let channel: Vec<f64> = train
        .render(FS, len)
        .iter()
        .enumerate()
        .map(|(i, x)| x * (1.0 + 0.5 * i as f64 / len as f64))
        .collect();

    let cancellation = create_canceller().cancel_detailed(&channel, &peaks).unwrap();
    let ratio = energy(&cancellation.residual) / energy(&channel);
    assert!(ratio < 0.01, "residual energy ratio {}", ratio);

    // Gain follows the growing amplitude
    let first = cancellation.gains.first().unwrap().qrs;
    let last = cancellation.gains.last().unwrap().qrs;
    assert!(last > first);
}

#[test]
fn test_energy_never_increases() {
    let mut rng = StdRng::seed_from_u64(11);
    let len = 12_000;
    let channel: Vec<f64> = (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let peaks = PeakSet::from_indices((100..len).step_by(650).collect(), len).unwrap();

    let residual = create_canceller().cancel(&channel, &peaks).unwrap();
    assert!(energy(&residual) <= energy(&channel) + 1e-9);
}

#[test]
fn test_preserves_samples_outside_windows() {
    let len = 10_000;
    let train = maternal_train();
    let peaks = crest_peaks(&train, len);
    let layout = create_canceller().layout();

    let mut channel = train.render(FS, len);
    // Marker well away from every window
    let marker = peaks.as_slice()[3] + layout.after() + 100;
    channel[marker] += 0.5;

    let residual = create_canceller().cancel(&channel, &peaks).unwrap();
    assert_eq!(residual[marker], channel[marker]);
}

#[test]
fn test_keeps_fetal_complex_between_maternal_beats() {
    let len = 20_000;
    let maternal = maternal_train();
    let fetal = ComplexTrain {
        rate_bpm: 140.0,
        amplitude: 0.1,
        width_s: 0.008,
        phase_s: 0.575 - 60.0 / 140.0,
    };
    let maternal_part = maternal.render(FS, len);
    let fetal_part = fetal.render(FS, len);
    let channel: Vec<f64> = maternal_part
        .iter()
        .zip(fetal_part.iter())
        .map(|(m, f)| m + f)
        .collect();

    let residual = create_canceller()
        .cancel(&channel, &crest_peaks(&maternal, len))
        .unwrap();

    for peak in crest_peaks(&fetal, len).iter().skip(1).take(20) {
        assert!(
            (residual[peak] - fetal_part[peak]).abs() < 0.02,
            "fetal peak at {}: {} vs {}",
            peak,
            residual[peak],
            fetal_part[peak]
        );
    }
}

#[test]
fn test_edge_beats_cancelled_without_template_update() {
    let len = 5_000;
    let train = ComplexTrain {
        phase_s: 0.05,
        ..maternal_train()
    };
    let channel = train.render(FS, len);
    let peaks = crest_peaks(&train, len);
    assert_eq!(peaks.as_slice()[0], 50);

    let cancellation = create_canceller().cancel_detailed(&channel, &peaks).unwrap();
    assert_eq!(cancellation.clipped_beats, 1);
    let template = cancellation.template.unwrap();
    // Seeded from the full windows, then updated by each of them
    let full = peaks.len() - 1;
    assert_eq!(template.beats_absorbed(), full.min(5) + full);

    let before = energy(&channel[..300]);
    let after = energy(&cancellation.residual[..300]);
    assert!(after < 0.05 * before, "edge residual {} of {}", after, before);
}

#[test]
fn test_alignment_corrects_peak_offset() {
    let len = 20_000;
    let train = maternal_train();
    let channel = train.render(FS, len);
    let shifted: Vec<usize> = crest_peaks(&train, len)
        .iter()
        .enumerate()
        .map(|(k, p)| if k % 2 == 0 { p + 4 } else { p - 3 })
        .collect();
    let peaks = PeakSet::from_indices(shifted, len).unwrap();

    let residual = create_canceller().cancel(&channel, &peaks).unwrap();
    let ratio = energy(&residual) / energy(&channel);
    assert!(ratio < 0.01, "residual energy ratio {}", ratio);
}
