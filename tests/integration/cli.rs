//! Binary-level tests against a pre-seeded cache, so no download happens

#![cfg(unix)]

use serial_test::serial;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

use super::helpers::{seed_cache, summary_body};

fn cst_runner(cache_root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cst-runner"))
        .args(args)
        .env("CST_RUNNER_CACHE_DIR", cache_root)
        .env_remove("CST_RUNNER_CONFIG")
        .env_remove("CST_RUNNER_TIMEOUT_SECS")
        .env_remove("CST_IMAGE")
        .env_remove("CST_CONFIG")
        .output()
        .expect("Failed to run cst-runner")
}

#[test]
#[serial]
fn test_passing_run_exits_zero_and_prints_json() {
    let temp = TempDir::new().unwrap();
    let cache = temp.path().join("cache");
    seed_cache(&cache, &summary_body(4, 4, 0));

    let output = cst_runner(
        &cache,
        &[
            "test",
            "--image",
            "app:1",
            "--config",
            "structure-tests.yaml",
            "--os",
            "linux",
            "--output",
            "json",
        ],
    );

    assert!(output.status.success(), "{output:?}");
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["Total"], 4);
    assert_eq!(summary["Pass"], 4);
    assert_eq!(summary["Fail"], 0);
    assert!(summary["Duration"].is_u64());
}

#[test]
#[serial]
fn test_failing_checks_exit_two() {
    let temp = TempDir::new().unwrap();
    let cache = temp.path().join("cache");
    seed_cache(&cache, &summary_body(5, 3, 2));

    let output = cst_runner(
        &cache,
        &[
            "test",
            "--image",
            "app:1",
            "--config",
            "structure-tests.yaml",
            "--os",
            "linux",
        ],
    );

    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Total Tests: 5"));
}

#[test]
#[serial]
fn test_tool_error_exits_one() {
    let temp = TempDir::new().unwrap();
    let cache = temp.path().join("cache");
    seed_cache(&cache, "exit 3");

    let output = cst_runner(
        &cache,
        &[
            "test",
            "--image",
            "app:1",
            "--config",
            "structure-tests.yaml",
            "--os",
            "linux",
        ],
    );

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("tool exited with code 3"), "{stderr}");
}

#[test]
#[serial]
fn test_zero_timeout_is_rejected_before_running() {
    let temp = TempDir::new().unwrap();
    let cache = temp.path().join("cache");
    let marker = temp.path().join("ran");
    seed_cache(
        &cache,
        &format!(
            "touch '{}'\n{}",
            marker.display(),
            summary_body(1, 1, 0)
        ),
    );

    let output = cst_runner(
        &cache,
        &[
            "test",
            "--image",
            "app:1",
            "--config",
            "structure-tests.yaml",
            "--os",
            "linux",
            "--timeout",
            "0",
        ],
    );

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("greater than zero"), "{stderr}");
    assert!(!marker.exists());
}

#[test]
#[serial]
fn test_unsupported_os_exits_one() {
    let temp = TempDir::new().unwrap();
    let output = cst_runner(
        &temp.path().join("cache"),
        &[
            "test",
            "--image",
            "app:1",
            "--config",
            "structure-tests.yaml",
            "--os",
            "plan9",
        ],
    );

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Not supported OS: plan9"));
}

#[test]
#[serial]
fn test_provision_prints_cached_path() {
    let temp = TempDir::new().unwrap();
    let cache = temp.path().join("cache");
    let seeded = seed_cache(&cache, &summary_body(1, 1, 0));

    let output = cst_runner(&cache, &["provision", "--os", "darwin"]);

    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        seeded.display().to_string()
    );
}

#[test]
#[serial]
fn test_cache_list_and_clear() {
    let temp = TempDir::new().unwrap();
    let cache = temp.path().join("cache");
    seed_cache(&cache, &summary_body(1, 1, 0));

    let listed = cst_runner(&cache, &["cache", "list"]);
    assert!(listed.status.success());
    assert!(String::from_utf8_lossy(&listed.stdout).contains("container-structure-test"));

    let cleared = cst_runner(&cache, &["cache", "clear"]);
    assert!(cleared.status.success());
    assert!(String::from_utf8_lossy(&cleared.stdout).contains("Removed"));

    let empty = cst_runner(&cache, &["cache", "list"]);
    assert!(String::from_utf8_lossy(&empty.stdout).contains("(empty)"));
}
