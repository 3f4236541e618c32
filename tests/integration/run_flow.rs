//! End-to-end runs: provision through a fake fetcher, execute the fake tool

#![cfg(unix)]

use serial_test::serial;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

use cst_runner::{RunnerError, TestExecutor, TestRunner};

use super::helpers::{provisioner, summary_body, ScriptFetcher};

fn runner(temp: &TempDir, fetcher: Arc<ScriptFetcher>) -> TestRunner {
    let test_file = temp.path().join("structure-tests.yaml");
    fs::write(&test_file, "schemaVersion: 2.0.0\n").unwrap();
    TestRunner::new(
        test_file,
        "registry.example/app:1.4",
        provisioner(&temp.path().join("cache"), fetcher),
        TestExecutor::new(),
    )
    .with_os_type("linux")
}

#[test]
#[serial]
fn test_cold_run_downloads_and_reports_summary() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(ScriptFetcher::new(&summary_body(10, 9, 1)));

    let summary = runner(&temp, fetcher.clone()).run().unwrap();

    assert_eq!(summary.total, 10);
    assert_eq!(summary.pass, 9);
    assert_eq!(summary.fail, 1);
    assert_eq!(fetcher.calls(), 1);
}

#[test]
#[serial]
fn test_second_run_uses_cache() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(ScriptFetcher::new(&summary_body(3, 3, 0)));

    runner(&temp, fetcher.clone()).run().unwrap();
    let summary = runner(&temp, fetcher.clone()).run().unwrap();

    assert!(summary.passed());
    assert_eq!(fetcher.calls(), 1);
}

#[test]
#[serial]
fn test_unsupported_os_fails_before_download() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(ScriptFetcher::new(&summary_body(1, 1, 0)));

    let err = runner(&temp, fetcher.clone())
        .with_os_type("Windows_NT")
        .run()
        .unwrap_err();

    assert!(matches!(err, RunnerError::UnsupportedPlatform { .. }));
    assert_eq!(fetcher.calls(), 0);
}

#[test]
#[serial]
fn test_empty_output_is_malformed() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(ScriptFetcher::new("true"));

    let err = runner(&temp, fetcher).run().unwrap_err();
    assert!(matches!(err, RunnerError::MalformedOutput { .. }));
}

#[test]
#[serial]
fn test_failing_tool_is_execution_failed() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(ScriptFetcher::new(
        "echo 'Cannot connect to the Docker daemon' >&2; exit 1",
    ));

    match runner(&temp, fetcher).run().unwrap_err() {
        RunnerError::ExecutionFailed { stderr, exit_code, .. } => {
            assert_eq!(exit_code, Some(1));
            assert!(stderr.contains("Docker daemon"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
#[serial]
fn test_spawned_run_can_be_cancelled() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(ScriptFetcher::new("exec sleep 30"));

    let handle = runner(&temp, fetcher).spawn();
    thread::sleep(Duration::from_millis(500));
    assert!(!handle.is_finished());
    handle.cancel();

    let err = handle.join().unwrap_err();
    assert!(matches!(err, RunnerError::Cancelled));
}

#[test]
#[serial]
fn test_concurrent_runs_share_one_download() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(ScriptFetcher::new(&summary_body(2, 2, 0)));
    let provisioner = provisioner(&temp.path().join("cache"), fetcher.clone());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            TestRunner::new(
                temp.path().join(format!("structure-tests-{i}.yaml")),
                format!("app:{i}"),
                Arc::clone(&provisioner),
                TestExecutor::new(),
            )
            .with_os_type("linux")
            .spawn()
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().total, 2);
    }
    assert_eq!(fetcher.calls(), 1);
}
