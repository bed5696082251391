/// CLI integration tests for rep-tracker.
///
/// These run the compiled binary end-to-end, piping JSON requests on stdin
/// and parsing the JSON written to stdout. Without `--classifier-cmd` the
/// binary falls back to the mock classifier, so no model runtime is needed.
///
/// Tests that script an external classifier need `sh` on PATH and are
/// skipped gracefully if it is not available.
use std::io::Write;
use std::process::{Command, Output, Stdio};

use serde_json::{Value, json};
use tempfile::tempdir;

fn sh_available() -> bool {
    Command::new("sh")
        .args(["-c", "true"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn run(args: &[&str], stdin: &str) -> Output {
    let bin = env!("CARGO_BIN_EXE_rep-tracker");
    let mut child = Command::new(bin)
        .args(args)
        .env_remove("REP_TRACKER_MODELS_DIR")
        .env_remove("REP_TRACKER_CLASSIFIER_CMD")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn rep-tracker binary");
    child
        .stdin
        .take()
        .expect("stdin piped")
        .write_all(stdin.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("wait for rep-tracker")
}

fn predict(args: &[&str], body: &str) -> Value {
    let mut full = vec!["predict"];
    full.extend_from_slice(args);
    let out = run(&full, body);
    assert!(
        out.status.success(),
        "predict exited non-zero: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("stdout is one JSON document")
}

fn serve(args: &[&str], lines: &[Value]) -> Vec<Value> {
    let mut full = vec!["serve"];
    full.extend_from_slice(args);
    let input: String = lines.iter().map(|l| format!("{l}\n")).collect();
    let out = run(&full, &input);
    assert!(
        out.status.success(),
        "serve exited non-zero: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8(out.stdout)
        .expect("utf-8 stdout")
        .lines()
        .map(|l| serde_json::from_str(l).expect("each line is JSON"))
        .collect()
}

#[test]
fn predict_get_exercises_lists_three() {
    let resp = predict(&[], r#"{"mode": "get_exercises"}"#);
    assert_eq!(resp["success"], true);
    assert_eq!(resp["total"], 3);
    let keys: Vec<&str> = resp["exercises"]
        .as_array()
        .expect("exercises array")
        .iter()
        .filter_map(|e| e["key"].as_str())
        .collect();
    assert_eq!(keys, vec!["pushup", "shoulder_press", "t_bar_row"]);
}

#[test]
fn predict_invalid_json_still_exits_zero() {
    let resp = predict(&[], "{this is not json");
    assert_eq!(resp["success"], false);
    assert_eq!(resp["error_kind"], "invalid_input");
    assert!(resp["timestamp"].is_number());
}

#[test]
fn predict_empty_stdin_reports_error() {
    let resp = predict(&[], "");
    assert_eq!(resp["success"], false);
    assert_eq!(resp["error_kind"], "invalid_input");
}

#[test]
fn predict_unknown_exercise_is_configuration_error() {
    let resp = predict(
        &[],
        r#"{"mode": "realtime_frame", "expected_exercise": "deadlift", "frame_data": [0.1]}"#,
    );
    assert_eq!(resp["success"], false);
    assert_eq!(resp["error_kind"], "configuration");
    assert!(resp["error"].as_str().unwrap_or_default().contains("pushup"));
}

#[test]
fn predict_realtime_frame_uses_mock_confidence() {
    let resp = predict(
        &["--mock-confidence", "0.25"],
        r#"{"mode": "realtime_frame", "expected_exercise": "pushup", "frame_data": [0.1, 0.2]}"#,
    );
    assert_eq!(resp["success"], true);
    assert_eq!(resp["is_mock"], true);
    assert_eq!(resp["frame_analysis"]["confidence_score"], 0.25);
    assert_eq!(resp["frame_analysis"]["prediction"]["label"], "incorrect");
    assert_eq!(resp["frame_analysis"]["rep_detection"]["current_rep_state"], "none");
}

#[test]
fn predict_reset_counters_acknowledges() {
    let resp = predict(&[], r#"{"mode": "reset_counters"}"#);
    assert_eq!(resp["success"], true);
    assert!(resp["message"].is_string());
}

#[test]
fn predict_test_mode_returns_fixed_mock() {
    let resp = predict(&[], r#"{"test": true}"#);
    assert_eq!(resp["success"], true);
    assert_eq!(resp["total_count"], 20);
    assert_eq!(resp["correct_count"], 16);
}

#[test]
fn predict_reads_threshold_from_models_dir() {
    let tmp = tempdir().expect("tempdir");
    let dir = tmp.path().join("Shoulder Press");
    std::fs::create_dir_all(&dir).expect("create model dir");
    std::fs::write(
        dir.join("meta.json"),
        json!({"timesteps": 8, "features": 4, "threshold": 0.8}).to_string(),
    )
    .expect("write meta.json");

    let models_dir = tmp.path().to_str().expect("utf-8 path");
    let resp = predict(&["--models-dir", models_dir], r#"{"mode": "get_exercises"}"#);
    let press = resp["exercises"]
        .as_array()
        .expect("exercises array")
        .iter()
        .find(|e| e["key"] == "shoulder_press")
        .expect("shoulder_press listed")
        .clone();
    assert_eq!(press["sequence_length"], 8);
    assert_eq!(press["features_per_frame"], 4);
    assert_eq!(press["threshold"], 0.8);

    let pushup = &resp["exercises"][0];
    assert_eq!(pushup["sequence_length"], 20);
}

#[test]
fn predict_external_classifier_scores_sequences() {
    if !sh_available() {
        eprintln!("SKIP: sh not available on PATH");
        return;
    }
    let resp = predict(
        &[
            "--classifier-cmd",
            "sh",
            "--classifier-arg",
            "-c",
            "--classifier-arg",
            r#"cat > /dev/null; echo '{"confidence": 0.875}'"#,
        ],
        r#"{"mode": "predict_single", "model": "pushup", "sequence_data": [[[1, 2]], [[3, 4]]]}"#,
    );
    assert_eq!(resp["success"], true, "{resp}");
    assert_eq!(resp["is_mock"], false);
    assert_eq!(resp["predictions"], json!(["correct", "correct"]));
    assert_eq!(resp["is_correct_overall"], true);
}

#[test]
fn predict_failing_classifier_is_reported_not_fatal() {
    if !sh_available() {
        eprintln!("SKIP: sh not available on PATH");
        return;
    }
    let resp = predict(
        &[
            "--classifier-cmd",
            "sh",
            "--classifier-arg",
            "-c",
            "--classifier-arg",
            "cat > /dev/null; echo broken >&2; exit 3",
        ],
        r#"{"mode": "realtime_frame", "expected_exercise": "pushup", "frame_data": [1]}"#,
    );
    assert_eq!(resp["success"], false);
    assert_eq!(resp["error_kind"], "classifier");
}

#[test]
fn serve_keeps_state_per_session() {
    let frame = |session: &str, t: f64| {
        json!({
            "mode": "realtime_frame",
            "session_id": session,
            "expected_exercise": "pushup",
            "frame_data": [t],
            "timestamp": t,
        })
    };
    let responses = serve(
        &[],
        &[
            frame("a", 0.0),
            frame("a", 0.1),
            frame("b", 0.0),
            json!({"mode": "reset_counters", "session_id": "a"}),
            frame("a", 0.2),
        ],
    );
    assert_eq!(responses.len(), 5);
    assert!(responses.iter().all(|r| r["success"] == true));
    assert_eq!(responses[1]["session_info"]["buffer_size"], 2);
    assert_eq!(responses[2]["session_info"]["session_id"], "b");
    assert_eq!(responses[2]["session_info"]["buffer_size"], 1);
    assert_eq!(responses[4]["session_info"]["buffer_size"], 1);
}

#[test]
fn serve_answers_bad_lines_and_continues() {
    let out = run(
        &["serve"],
        "{broken\n\n{\"mode\": \"get_exercises\"}\n",
    );
    assert!(out.status.success());
    let lines: Vec<Value> = String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(|l| serde_json::from_str(l).expect("each line is JSON"))
        .collect();
    assert_eq!(lines.len(), 2, "blank lines are skipped");
    assert_eq!(lines[0]["success"], false);
    assert_eq!(lines[1]["total"], 3);
}

#[test]
fn unknown_subcommand_exits_non_zero() {
    let out = run(&["dance"], "");
    assert!(!out.status.success());
}
