use std::process::Command;

use serde_json::Value;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_fecg_cli"))
}

#[test]
fn synthetic_run_outputs_report() {
    let output = cli()
        .args(["synthetic", "--duration-s", "20", "--seed", "3"])
        .output()
        .expect("failed to run fecg_cli synthetic");
    assert!(
        output.status.success(),
        "CLI exited with {:?}",
        output.status.code()
    );

    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    let json: Value = serde_json::from_str(stdout.trim()).expect("synthetic report JSON payload");
    assert_eq!(json["duration_s"].as_f64(), Some(20.0));
    assert_eq!(json["sample_rate"].as_u64(), Some(1000));
    assert_eq!(json["weights"].as_array().map(Vec::len), Some(4));
    assert!(
        json["fetal_peaks"].as_array().map_or(0, Vec::len) >= 1,
        "expected fetal peaks, got {stdout}"
    );
    assert!(json["metrics"]["sensitivity"].as_f64().is_some());
    assert!(json["metrics"]["undefined"]["ppv"].is_boolean());
}

#[test]
fn synthetic_report_written_to_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("report.json");
    let output = cli()
        .args(["synthetic", "--duration-s", "10", "--output"])
        .arg(&path)
        .output()
        .expect("failed to run fecg_cli synthetic --output");
    assert!(output.status.success());

    let contents = std::fs::read_to_string(&path).expect("report file");
    let json: Value = serde_json::from_str(&contents).expect("report JSON");
    assert!(json["maternal_peaks"].is_array());
}

#[test]
fn default_config_prints_json() {
    let output = cli()
        .arg("default-config")
        .output()
        .expect("failed to run default-config");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    let json: Value = serde_json::from_str(stdout.trim()).expect("config JSON");
    assert_eq!(json["preprocessing"]["powerline_freq_hz"], 50);
    assert_eq!(json["combination"]["strategy"], "snr_weighted");
}

#[test]
fn too_short_recording_fails() {
    let output = cli()
        .args(["synthetic", "--duration-s", "1"])
        .output()
        .expect("failed to run short synthetic");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).expect("stderr UTF-8");
    assert!(
        stderr.contains("Insufficient length"),
        "expected length error, got {stderr}"
    );
}
