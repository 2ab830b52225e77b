use assert_cmd::Command;
use serde_json::Value;
use std::path::PathBuf;

fn session_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../test_data/session.toml")
}

#[test]
fn validate_prints_expected_counts() {
    let output = Command::cargo_bin("cue")
        .unwrap()
        .args(["validate", "--config", session_config().to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["subject"], "s01");
    assert_eq!(json["expected_triggers"], 20);
    assert_eq!(json["expected_duration_ms"], 24_000);
    assert_eq!(json["device"]["driver"], "synthetic");
}

#[test]
fn plan_lists_every_onset() {
    let output = Command::cargo_bin("cue")
        .unwrap()
        .args(["plan", "--config", session_config().to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let rows: Vec<Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(rows.len(), 20);
    assert_eq!(rows[0]["phase"], "concentration");
    assert_eq!(rows[1]["offset_ms"], 500);
    assert_eq!(rows[1]["stimulus_text"], "up");
    assert_eq!(rows[19]["phase"], "rest");
    assert_eq!(rows[19]["repeat_index"], 1);
}

#[test]
fn missing_config_fails() {
    Command::cargo_bin("cue")
        .unwrap()
        .args(["validate", "--config", "does/not/exist.toml"])
        .assert()
        .failure();
}
