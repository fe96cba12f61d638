use fecg_core::analysis::preprocess::Preprocessor;
use fecg_core::config::{CombineStrategy, DetectionMethod, PipelineConfig};
use fecg_core::testing::{generate, ComplexTrain, SyntheticScenario};
use fecg_core::{evaluate, run_batch, run_pipeline, PipelineError, Recording};

fn scenario(duration_s: f64, seed: u64) -> SyntheticScenario {
    SyntheticScenario {
        duration_s,
        seed,
        ..SyntheticScenario::default()
    }
}

#[test]
fn synthetic_recording_recovers_fetal_beats() {
    let synthetic = generate(&SyntheticScenario::default()).expect("synthetic recording");
    let config = PipelineConfig::default();
    let fs = synthetic.recording.sample_rate();

    let output = run_pipeline(&synthetic.recording, &config).expect("pipeline run");
    assert_eq!(output.enhanced.len(), synthetic.recording.len());
    assert!(output.degenerate_channels.is_empty());

    let maternal = evaluate(&output.maternal_peaks, &synthetic.maternal_truth, fs, &config.scoring);
    assert!(
        maternal.sensitivity >= 0.95 && maternal.ppv >= 0.95,
        "maternal metrics {:?}",
        maternal
    );

    let fetal = evaluate(&output.fetal_peaks, &synthetic.fetal_truth, fs, &config.scoring);
    assert!(fetal.sensitivity >= 0.8, "fetal metrics {:?}", fetal);
    assert!(fetal.ppv >= 0.75, "fetal metrics {:?}", fetal);
}

#[test]
fn fetal_beats_drifting_through_maternal_complexes_are_recovered() {
    // 143 bpm is not locked to the maternal 70 bpm, so fetal beats walk
    // across every maternal complex over the minute
    let defaults = SyntheticScenario::default();
    let synthetic = generate(&SyntheticScenario {
        fetal: ComplexTrain {
            rate_bpm: 143.0,
            ..defaults.fetal
        },
        ..defaults
    })
    .expect("synthetic recording");
    let config = PipelineConfig::default();
    let fs = synthetic.recording.sample_rate();

    let output = run_pipeline(&synthetic.recording, &config).expect("pipeline run");
    let fetal = evaluate(&output.fetal_peaks, &synthetic.fetal_truth, fs, &config.scoring);
    assert!(fetal.sensitivity >= 0.8, "fetal metrics {:?}", fetal);
}

#[test]
fn template_matching_finds_maternal_beats() {
    let synthetic = generate(&scenario(30.0, 9)).expect("synthetic recording");
    let mut config = PipelineConfig::default();
    config.maternal_detection.method = DetectionMethod::TemplateMatch;
    let fs = synthetic.recording.sample_rate();

    let output = run_pipeline(&synthetic.recording, &config).expect("pipeline run");
    let maternal = evaluate(&output.maternal_peaks, &synthetic.maternal_truth, fs, &config.scoring);
    assert!(
        maternal.sensitivity >= 0.95 && maternal.ppv >= 0.95,
        "maternal metrics {:?}",
        maternal
    );
}

#[test]
fn resampled_recording_runs_end_to_end() {
    let synthetic = generate(&scenario(20.0, 4)).expect("synthetic recording");
    let resampled = synthetic.recording.resample(500).expect("resampled recording");
    assert_eq!(resampled.sample_rate(), 500);
    assert_eq!(resampled.len(), synthetic.recording.len() / 2);

    let output = run_pipeline(&resampled, &PipelineConfig::default()).expect("pipeline run");
    assert_eq!(output.enhanced.len(), resampled.len());
    assert!(!output.maternal_peaks.is_empty());
}

#[test]
fn principal_component_strategy_runs_end_to_end() {
    let synthetic = generate(&scenario(20.0, 5)).expect("synthetic recording");
    let mut config = PipelineConfig::default();
    config.combination.strategy = CombineStrategy::PrincipalComponent;

    let output = run_pipeline(&synthetic.recording, &config).expect("pipeline run");
    let weight_sum: f64 = output.channel_weights.iter().sum();
    assert!((weight_sum - 1.0).abs() < 1e-9);
    assert_eq!(output.maternal_peaks_per_channel.len(), 4);
}

#[test]
fn minimum_length_boundary() {
    let config = PipelineConfig::default();
    let min = Preprocessor::new(1000, &config.preprocessing)
        .expect("preprocessor")
        .min_length();

    let exact = Recording::new(1000, vec![vec![0.0; min]; 2]).expect("recording");
    assert!(run_pipeline(&exact, &config).is_ok());

    let short = Recording::new(1000, vec![vec![0.0; min - 1]; 2]).expect("recording");
    assert_eq!(
        run_pipeline(&short, &config).unwrap_err(),
        PipelineError::InsufficientLength {
            required: min,
            actual: min - 1
        }
    );
}

#[test]
fn batch_results_keep_input_order() {
    let config = PipelineConfig::default();
    let first = generate(&scenario(15.0, 1)).expect("synthetic recording");
    let second = generate(&scenario(15.0, 2)).expect("synthetic recording");
    let short = Recording::new(1000, vec![vec![0.0; 100]]).expect("recording");

    let recordings = vec![
        first.recording.clone(),
        short,
        second.recording.clone(),
    ];
    let results = run_batch(&recordings, &config);
    assert_eq!(results.len(), 3);

    assert!(matches!(
        results[1],
        Err(PipelineError::InsufficientLength { .. })
    ));
    for (result, synthetic) in [(&results[0], &first), (&results[2], &second)] {
        let output = result.as_ref().expect("pipeline run");
        let single = run_pipeline(&synthetic.recording, &config).expect("pipeline run");
        assert_eq!(output, &single);
    }
}
