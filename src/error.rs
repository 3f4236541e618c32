//! Error taxonomy for provisioning and running the verification tool.

use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by [`crate::runner::TestRunner::run`] and its components.
///
/// Nothing in this crate retries: every variant reaches the caller as-is.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The host OS has no entry in the download table
    #[error("Not supported OS: {os}")]
    UnsupportedPlatform { os: String },

    /// Download, checksum verification or cache registration failed
    #[error("Failed to provision tool: {reason}")]
    ProvisionFailed { reason: String },

    /// The provisioned binary could not be resolved as an executable
    #[error("Unable to find the tool at '{}'", path.display())]
    ToolNotFound { path: PathBuf },

    /// The tool could not start, was killed, or exited unsuccessfully
    #[error("Error while executing the tool: {reason}")]
    ExecutionFailed {
        reason: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The tool succeeded but its output is not a test summary
    #[error("Malformed output from tool: {reason}")]
    MalformedOutput { reason: String, output: String },

    /// The run was cancelled through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,
}

impl RunnerError {
    pub(crate) fn provision(reason: impl Into<String>) -> Self {
        RunnerError::ProvisionFailed {
            reason: reason.into(),
        }
    }

    /// Stable short name of the variant, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RunnerError::UnsupportedPlatform { .. } => "unsupported_platform",
            RunnerError::ProvisionFailed { .. } => "provision_failed",
            RunnerError::ToolNotFound { .. } => "tool_not_found",
            RunnerError::ExecutionFailed { .. } => "execution_failed",
            RunnerError::MalformedOutput { .. } => "malformed_output",
            RunnerError::Cancelled => "cancelled",
        }
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
