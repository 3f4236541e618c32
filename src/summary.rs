//! Pass/fail summary reported by the verification tool

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Result, RunnerError};

/// Counts reported by one tool invocation plus its measured duration.
///
/// Field names follow the tool's JSON (`Total`, `Pass`, `Fail`). `Duration`
/// is milliseconds and always comes from our own clock, never from the tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    #[serde(rename = "Total")]
    pub total: u64,
    #[serde(rename = "Pass")]
    pub pass: u64,
    #[serde(rename = "Fail")]
    pub fail: u64,
    #[serde(rename = "Duration", skip_deserializing)]
    pub duration: u64,
}

impl TestSummary {
    /// Parse the tool's standard output and attach the measured duration.
    ///
    /// Empty output and JSON that doesn't carry the three counts are both
    /// `MalformedOutput`. Extra fields such as `Results` are ignored.
    pub fn from_tool_output(stdout: &str, elapsed: Duration) -> Result<Self> {
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Err(RunnerError::MalformedOutput {
                reason: "No output from runner".to_string(),
                output: stdout.to_string(),
            });
        }

        let mut summary: TestSummary =
            serde_json::from_str(trimmed).map_err(|e| RunnerError::MalformedOutput {
                reason: format!("output is not a test summary: {e}"),
                output: stdout.to_string(),
            })?;

        summary.duration = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        Ok(summary)
    }

    /// True when no check failed.
    pub fn passed(&self) -> bool {
        self.fail == 0
    }
}

impl fmt::Display for TestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total Tests: {}, Pass: {}, Fail: {}",
            self.total, self.pass, self.fail
        )
    }
}
