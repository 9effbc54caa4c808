//! CLI integration tests

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

/// Build command for the robotwin-cli binary.
fn robotwin_cli() -> Command {
    cargo_bin_cmd!("robotwin-cli")
}

/// Path to robotwin library test fixtures (relative to workspace).
fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("robotwin")
        .join("tests")
        .join("fixtures")
}

#[test]
fn test_cli_help() {
    let mut cmd = robotwin_cli();

    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("simulation"));
}

#[test]
fn test_cli_version() {
    let mut cmd = robotwin_cli();

    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_run_divider() {
    let mut cmd = robotwin_cli();

    cmd.arg("run")
        .arg(fixtures_dir().join("divider.json"))
        .arg("--ticks")
        .arg("2");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("NET:MID"))
        .stdout(predicate::str::contains("2.49998"))
        .stdout(predicate::str::contains("No diagnostics"));
}

#[test]
fn test_cli_run_json() {
    let mut cmd = robotwin_cli();

    cmd.arg("run")
        .arg(fixtures_dir().join("divider.json"))
        .arg("--ticks")
        .arg("3")
        .arg("--format")
        .arg("json");

    let output = cmd.assert().success().get_output().stdout.clone();
    let json: serde_json::Value = serde_json::from_slice(&output).expect("valid JSON");
    assert_eq!(json["circuit_id"], "divider");
    assert_eq!(json["ticks"], 3);
    assert_eq!(json["final_frame"]["tick_index"], 2);
}

#[test]
fn test_cli_run_fail_on_diagnostics() {
    let mut cmd = robotwin_cli();

    cmd.arg("run")
        .arg(fixtures_dir().join("floating.json"))
        .arg("--ticks")
        .arg("1")
        .arg("--fail-on-diagnostics");

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("Floating net 'LONE'."));
}

#[test]
fn test_cli_run_with_firmware_and_record() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("rec");
    let mut cmd = robotwin_cli();

    cmd.arg("run")
        .arg(fixtures_dir().join("blink_uno.json"))
        .arg("--ticks")
        .arg("5")
        .arg("--dt")
        .arg("0.001")
        .arg("--board-firmware")
        .arg("U1=blink:D13:1000")
        .arg("--record")
        .arg(&out);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Recording session"))
        .stdout(predicate::str::contains("PIN:U1.D13"));

    let frames = std::fs::read_to_string(out.join("frames.jsonl")).unwrap();
    assert_eq!(frames.lines().count(), 5);
}

#[test]
fn test_cli_run_bad_board_firmware_arg() {
    let mut cmd = robotwin_cli();

    cmd.arg("run")
        .arg(fixtures_dir().join("divider.json"))
        .arg("--board-firmware")
        .arg("no-equals-sign");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("ID=FIRMWARE"));
}

#[test]
fn test_cli_run_missing_file() {
    let mut cmd = robotwin_cli();

    cmd.arg("run").arg("nonexistent.json");

    cmd.assert().failure().stderr(predicate::str::contains("Error"));
}

#[test]
fn test_cli_hex_summary() {
    let mut cmd = robotwin_cli();

    cmd.arg("hex").arg(fixtures_dir().join("led_on.hex"));

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Decoded:      3"))
        .stdout(predicate::str::contains("Unknown:      1"))
        .stdout(predicate::str::contains("0x0000-0x0007"));
}

#[test]
fn test_cli_hex_rejects_bad_checksum() {
    let mut cmd = robotwin_cli();

    cmd.arg("hex").arg(fixtures_dir().join("bad_checksum.hex"));

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("HEX line 1 checksum mismatch."));
}

#[test]
fn test_cli_trace_diff_identical() {
    let trace = fixtures_dir().join("golden_trace_v1.json");
    let mut cmd = robotwin_cli();

    cmd.arg("trace-diff").arg(&trace).arg(&trace);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Traces match (4 steps)"));
}

#[test]
fn test_cli_trace_diff_reports_changes() {
    let dir = TempDir::new().unwrap();
    let baseline = fixtures_dir().join("golden_trace_v1.json");
    let mut trace: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&baseline).unwrap()).unwrap();
    trace["steps"][1]["expected_pins"][0] = serde_json::json!(0);
    let candidate = dir.path().join("candidate.json");
    std::fs::write(&candidate, serde_json::to_string(&trace).unwrap()).unwrap();

    let mut cmd = robotwin_cli();
    cmd.arg("trace-diff").arg(&baseline).arg(&candidate);

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("step=2 pin=0 expected=1 actual=0"));
}

#[test]
fn test_cli_boards() {
    let mut cmd = robotwin_cli();

    cmd.arg("boards");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("ArduinoUno"))
        .stdout(predicate::str::contains("ArduinoMega"));
}

#[test]
fn test_cli_boards_json() {
    let mut cmd = robotwin_cli();

    cmd.arg("boards").arg("--format").arg("json");

    let output = cmd.assert().success().get_output().stdout.clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["boards"].as_array().map(Vec::len), Some(4));
}
