//! Runs the verification tool against an image and maps its output to a
//! [`TestSummary`].

pub mod process;


use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::error::{Result, RunnerError};
use crate::summary::TestSummary;

pub use process::ExecutionResult;

#[derive(Debug, Clone, Default)]
pub struct TestExecutor {
    timeout: Option<Duration>,
}

impl TestExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the tool and fail the run if it takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Invoke `<tool> test --image <image> --config <test_file> --json` and
    /// parse the summary it prints.
    pub fn run(
        &self,
        tool_path: &Path,
        test_file_path: &Path,
        image_name: &str,
        cancel: &CancellationToken,
    ) -> Result<TestSummary> {
        make_executable(tool_path);

        let resolved = which::which(tool_path).map_err(|e| {
            tracing::debug!(path = %tool_path.display(), error = %e, "tool lookup failed");
            RunnerError::ToolNotFound {
                path: tool_path.to_path_buf(),
            }
        })?;

        let args = tool_args(test_file_path, image_name);
        tracing::debug!(tool = %resolved.display(), ?args, "running tool");

        let result = process::run_program(&resolved, &args, self.timeout, cancel);
        log_diagnostics(&result);

        if result.cancelled {
            return Err(RunnerError::Cancelled);
        }

        if !result.succeeded() {
            let reason = failure_reason(&result);
            tracing::error!(%reason, exit_code = ?result.exit_code, "Error while executing the tool");
            return Err(RunnerError::ExecutionFailed {
                reason,
                exit_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }

        TestSummary::from_tool_output(&result.stdout, result.duration)
    }
}

/// Argument vector for one invocation, in the order the tool documents.
pub fn tool_args(test_file_path: &Path, image_name: &str) -> Vec<OsString> {
    vec![
        OsString::from("test"),
        OsString::from("--image"),
        OsString::from(image_name),
        OsString::from("--config"),
        test_file_path.as_os_str().to_os_string(),
        OsString::from("--json"),
    ]
}

/// Best effort: a missing file is reported by the lookup that follows.
fn make_executable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)) {
            tracing::debug!(path = %path.display(), error = %e, "could not mark tool executable");
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

fn log_diagnostics(result: &ExecutionResult) {
    tracing::debug!("Standard Output: {}", result.stdout);
    tracing::debug!("Standard Error: {}", result.stderr);
    tracing::debug!(
        "Error from command executor: {}",
        result.invocation_error.as_deref().unwrap_or("none")
    );
    tracing::debug!("Return code from command executor: {:?}", result.exit_code);
    tracing::debug!(duration_ms = result.duration.as_millis() as u64, "tool finished");
}

fn failure_reason(result: &ExecutionResult) -> String {
    match (&result.invocation_error, result.exit_code) {
        (Some(error), _) => error.clone(),
        (None, Some(code)) => format!("tool exited with code {code}"),
        (None, None) => "tool exited without an exit code".to_string(),
    }
}
