//! Integration tests for the spawnpool binary.
//!
//! Each test runs the real binary, so every pool here is made of separate
//! worker processes re-executed from it.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::time::Duration;
use tempfile::tempdir;

/// Get a command for the spawnpool binary.
fn spawnpool() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("spawnpool").unwrap();
    // Keep the caller's environment from changing pool or log behavior.
    cmd.env_remove("SPAWNPOOL_WORKERS")
        .env_remove("SPAWNPOOL_PROGRAM")
        .env_remove("SPAWNPOOL_WORKER")
        .env_remove("SPAWNPOOL_LOG")
        .env_remove("SPAWNPOOL_LOG_FILE")
        .env_remove("RUST_LOG")
        .timeout(Duration::from_secs(30));
    cmd
}

fn stdout_lines(output: &std::process::Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(String::from)
        .collect()
}

fn parse_report(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be one JSON document")
}

fn sorted_numbers(values: &[Value]) -> Vec<i64> {
    let mut numbers: Vec<i64> = values.iter().map(|v| v.as_i64().unwrap()).collect();
    numbers.sort_unstable();
    numbers
}

#[test]
fn test_help() {
    spawnpool()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("double"))
        .stdout(predicate::str::contains("collatz"));
}

#[test]
fn test_double_two_workers() {
    let output = spawnpool()
        .args(["double", "1", "2", "3", "4", "5", "-w", "2"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let mut results: Vec<i64> = stdout_lines(&output)
        .iter()
        .map(|l| l.parse().unwrap())
        .collect();
    results.sort_unstable();
    assert_eq!(results, vec![2, 4, 6, 8, 10]);
}

#[test]
fn test_single_worker_preserves_order() {
    spawnpool()
        .args(["double", "5", "3", "1", "4", "-w", "1"])
        .assert()
        .success()
        .stdout("10\n6\n2\n8\n");
}

#[test]
fn test_zero_tasks_shut_down_cleanly() {
    spawnpool()
        .args(["double", "-w", "3"])
        .timeout(Duration::from_secs(10))
        .assert()
        .success()
        .stdout("");
}

#[test]
fn test_zero_tasks_json_stats() {
    let output = spawnpool()
        .args(["double", "-w", "2", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = parse_report(&output);
    assert_eq!(report["results"], serde_json::json!([]));
    assert_eq!(report["stats"]["tasks_sent"], 0);
    assert_eq!(report["stats"]["tasks_done"], 0);
    assert_eq!(report["stats"]["workers"], 2);
}

#[test]
fn test_workers_are_reaped_after_drain() {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let output = spawnpool()
        .args(["double", "1", "2", "3", "-w", "3", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = parse_report(&output);
    let pids = report["stats"]["worker_pids"].as_array().unwrap();
    assert_eq!(pids.len(), 3);
    for pid in pids {
        let pid = Pid::from_raw(pid.as_i64().unwrap() as i32);
        assert!(kill(pid, None).is_err(), "worker {pid} still exists");
    }
}

#[test]
fn test_slow_tasks_complete_out_of_order() {
    // The odd value sleeps in its worker while the even one finishes first.
    spawnpool()
        .args(["double", "1", "2", "-w", "2", "--delay-ms", "500"])
        .assert()
        .success()
        .stdout("4\n2\n");
}

#[test]
fn test_many_tasks_no_duplicates() {
    let values: Vec<String> = (1..=200).map(|n| n.to_string()).collect();
    let output = spawnpool()
        .arg("double")
        .args(&values)
        .args(["-w", "4", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = parse_report(&output);
    let results = sorted_numbers(report["results"].as_array().unwrap());
    let expected: Vec<i64> = (1..=200).map(|n| n * 2).collect();
    assert_eq!(results, expected);
    assert_eq!(report["stats"]["tasks_sent"], 200);
    assert_eq!(report["stats"]["tasks_done"], 200);
}

#[test]
fn test_negative_values() {
    let output = spawnpool()
        .args(["double", "-w", "2", "--format", "json", "--", "-3", "-8"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = parse_report(&output);
    assert_eq!(
        sorted_numbers(report["results"].as_array().unwrap()),
        vec![-16, -6]
    );
}

#[test]
fn test_collatz() {
    let output = spawnpool()
        .args(["collatz", "--limit", "30", "-w", "4", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = parse_report(&output);
    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 30);
    assert!(results.contains(&serde_json::json!([27, 111])));
    assert!(results.contains(&serde_json::json!([1, 0])));
}

#[test]
fn test_collatz_plain_output() {
    spawnpool()
        .args(["collatz", "--limit", "6", "-w", "1"])
        .assert()
        .success()
        .stdout("1 0\n2 1\n3 7\n4 2\n5 5\n6 8\n");
}

#[test]
fn test_worker_count_from_env() {
    let output = spawnpool()
        .env("SPAWNPOOL_WORKERS", "2")
        .args(["double", "7", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = parse_report(&output);
    assert_eq!(report["stats"]["workers"], 2);
    assert_eq!(report["results"], serde_json::json!([14]));
}

#[test]
fn test_zero_workers_is_config_error() {
    spawnpool()
        .args(["double", "1", "-w", "0"])
        .assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains("worker count must be at least 1"));
}

#[test]
fn test_unlaunchable_worker_program() {
    spawnpool()
        .env("SPAWNPOOL_PROGRAM", "/nonexistent/spawnpool-worker")
        .args(["double", "1", "-w", "2"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Bootstrap error"));
}

#[test]
fn test_malformed_manifest_is_rejected() {
    spawnpool()
        .env("SPAWNPOOL_WORKER", "not a manifest")
        .args(["double", "1", "-w", "1"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("manifest"));
}

#[test]
fn test_verbose_logs_stay_off_stdout() {
    let output = spawnpool()
        .args(["-vv", "double", "1", "2", "3", "-w", "2"])
        .output()
        .unwrap();
    assert!(output.status.success());

    for line in stdout_lines(&output) {
        assert!(line.parse::<i64>().is_ok(), "unexpected stdout line: {line}");
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Worker pool filled"));
    assert!(stderr.contains("Worker started"));
}

#[test]
fn test_log_file() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("pool.log");

    spawnpool()
        .env("SPAWNPOOL_LOG_FILE", &log_path)
        .args(["-v", "double", "1", "2", "-w", "2"])
        .assert()
        .success();

    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert!(contents.contains("Worker pool drained and terminated"));
    assert!(!contents.contains("\x1b["), "log file should have no ANSI codes");
}

#[test]
fn test_json_log_format() {
    let output = spawnpool()
        .args(["-v", "--log-format", "json", "double", "4", "-w", "1"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    let events: Vec<Value> = stderr
        .lines()
        .map(|l| serde_json::from_str(l).expect("each log line should be JSON"))
        .collect();
    assert!(
        events
            .iter()
            .any(|e| e["fields"]["message"] == "Worker pool filled")
    );
}
