#![cfg(feature = "cli")]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const QUICK_PLAN: &str = r#"{
    "sequences": [
        { "template": "set_selector_valve", "fluidic_port": 4 },
        { "template": "preuse_check_pressure", "fluidic_port": 2 },
        { "template": "fill_incubate_drain", "name": "Rinse", "repeat": 2,
          "fluidic_port": 3, "flow_time_s": 1, "incubation_time_min": 0.005 }
    ]
}"#;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "fluidlink-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn write_plan(dir: &Path, text: &str) -> PathBuf {
    let path = dir.join("plan.json");
    std::fs::write(&path, text).expect("plan should be writable");
    path
}

fn fluidlink(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fluidlink"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("fluidlink should run")
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("stdout line should be JSON"))
        .collect()
}

#[test]
fn expand_prints_steps_for_plan() {
    let dir = unique_temp_dir("expand");
    let plan = write_plan(&dir, QUICK_PLAN);

    let output = fluidlink(&["expand", plan.to_str().unwrap()]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let lines = json_lines(&output);
    let rows = lines[0].as_array().expect("expand should print an array");
    let opcodes: Vec<&str> = rows.iter().map(|r| r["opcode"].as_str().unwrap()).collect();
    assert_eq!(
        opcodes,
        vec![
            "SET_SELECTOR_VALVE",
            "PREUSE_CHECK_PRESSURE",
            "ADD_MEDIUM",
            "EMPTY_FLUIDIC_LINE",
            "WAIT",
            "REMOVE_MEDIUM",
            "ADD_MEDIUM",
            "EMPTY_FLUIDIC_LINE",
            "WAIT",
            "REMOVE_MEDIUM",
        ]
    );
    assert_eq!(rows[2]["sequence"], "Rinse (round 1)");
    assert_eq!(rows[0]["p2"], 4);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn expand_demo_plan() {
    let plan = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/wash-cycle.json");
    let output = fluidlink(&["expand", plan.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn run_simulated_plan_to_completion() {
    let dir = unique_temp_dir("run");
    let plan = write_plan(&dir, QUICK_PLAN);

    let output = fluidlink(&[
        "run",
        plan.to_str().unwrap(),
        "--simulate",
        "--poll-interval",
        "2ms",
        "--tick-interval",
        "5ms",
        "--timeout",
        "60s",
    ]);

    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let events = json_lines(&output);
    let names: Vec<&str> = events.iter().map(|e| e["event"].as_str().unwrap()).collect();
    assert_eq!(names.first(), Some(&"execution_started"));
    assert_eq!(names.last(), Some(&"execution_finished"));
    assert_eq!(names.iter().filter(|n| **n == "sequence_finished").count(), 4);
    assert_eq!(names.iter().filter(|n| **n == "command_completed").count(), 8);
    assert!(events
        .iter()
        .any(|e| e["event"] == "preuse_check_result" && e["passed"] == true));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn run_rejects_invalid_plan() {
    let dir = unique_temp_dir("invalid");
    let plan = write_plan(
        &dir,
        r#"{ "sequences": [ { "template": "flush", "fluidic_port": 2, "flow_time_s": 5 } ] }"#,
    );

    let output = fluidlink(&["run", plan.to_str().unwrap(), "--simulate"]);

    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("pressure_setting"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn run_without_device_is_usage_error() {
    let dir = unique_temp_dir("nodevice");
    let plan = write_plan(&dir, QUICK_PLAN);

    let output = fluidlink(&["run", plan.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(64));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_simulated_command_prints_reading() {
    let output = fluidlink(&["send", "SET_SELECTOR_VALVE", "--p2", "5", "--simulate"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let lines = json_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["selector_valve"], 5);
    assert_eq!(lines[0]["status"], "completed");
}

#[test]
fn send_unknown_opcode_is_usage_error() {
    let output = fluidlink(&["send", "PUMP_FASTER", "--simulate"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn monitor_simulated_device_prints_one_reading() {
    let output = fluidlink(&[
        "monitor",
        "--simulate",
        "--count",
        "1",
        "--interval",
        "5ms",
        "--timeout",
        "5s",
    ]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let lines = json_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["program"], "idle");
}

fn csv_rows(path: &Path) -> (String, Vec<Vec<String>>) {
    let text = std::fs::read_to_string(path).expect("measurement log should exist");
    let mut lines = text.lines();
    let header = lines.next().expect("measurement log should have a header").to_string();
    let rows = lines
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect();
    (header, rows)
}

const MEASUREMENT_HEADER: &str = "timestamp,sequence_id,opcode,status,program,selector_valve,\
pressure_psi,vacuum_psi,pump_power,flow_upstream_ul_min,flow_downstream_ul_min,volume_ul,\
elapsed_s,bubble_sensor_1,bubble_sensor_2,flow_sensor_fluid,manual_control";

#[test]
fn monitor_logs_each_frame_to_csv() {
    let dir = unique_temp_dir("monitor-log");
    let log = dir.join("measurements.csv");

    let output = fluidlink(&[
        "monitor",
        "--simulate",
        "--count",
        "1",
        "--interval",
        "5ms",
        "--timeout",
        "5s",
        "--log-measurements",
        log.to_str().unwrap(),
    ]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let (header, rows) = csv_rows(&log);
    assert_eq!(header, MEASUREMENT_HEADER);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].len(), 17);
    assert!(rows[0][0].parse::<f64>().unwrap() > 0.0);
    assert_eq!(rows[0][3], "completed");
    assert_eq!(rows[0][4], "idle");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn run_logs_frames_to_csv() {
    let dir = unique_temp_dir("run-log");
    let plan = write_plan(&dir, QUICK_PLAN);
    let log = dir.join("measurements.csv");

    let output = fluidlink(&[
        "run",
        plan.to_str().unwrap(),
        "--simulate",
        "--poll-interval",
        "2ms",
        "--tick-interval",
        "5ms",
        "--timeout",
        "60s",
        "--log-measurements",
        log.to_str().unwrap(),
    ]);

    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let (header, rows) = csv_rows(&log);
    assert_eq!(header, MEASUREMENT_HEADER);
    assert!(rows.len() >= 8, "only {} rows", rows.len());
    assert!(rows.iter().all(|row| row.len() == 17));
    assert!(rows.iter().any(|row| row[5] == "4"));
    let stamps: Vec<f64> = rows.iter().map(|row| row[0].parse().unwrap()).collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn templates_lists_every_template() {
    let output = fluidlink(&["templates"]);

    assert!(output.status.success());
    let lines = json_lines(&output);
    let rows = lines[0].as_array().unwrap();
    assert_eq!(rows.len(), 17);
    assert!(rows.iter().any(|r| r["template"] == "set_10mm_valve"));
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_fluidlink"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("fluidlink {}", env!("CARGO_PKG_VERSION")));
}
