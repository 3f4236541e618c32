//! One test run: provision the tool, execute it, report the summary

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::executor::TestExecutor;
use crate::provision::{current_os_type, ToolProvisioner};
use crate::summary::TestSummary;

pub struct TestRunner {
    test_file_path: PathBuf,
    image_name: String,
    os_type: String,
    provisioner: Arc<ToolProvisioner>,
    executor: TestExecutor,
    cancel: CancellationToken,
}

impl TestRunner {
    pub fn new(
        test_file_path: impl Into<PathBuf>,
        image_name: impl Into<String>,
        provisioner: Arc<ToolProvisioner>,
        executor: TestExecutor,
    ) -> Self {
        Self {
            test_file_path: test_file_path.into(),
            image_name: image_name.into(),
            os_type: current_os_type().to_string(),
            provisioner,
            executor,
            cancel: CancellationToken::new(),
        }
    }

    /// Provision for `os_type` instead of the host OS.
    pub fn with_os_type(mut self, os_type: impl Into<String>) -> Self {
        self.os_type = os_type.into();
        self
    }

    /// Share an existing token, e.g. one wired to Ctrl+C.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn test_file_path(&self) -> &Path {
        &self.test_file_path
    }

    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    /// Provision, execute and return the summary. Blocks until the tool exits.
    pub fn run(&self) -> Result<TestSummary> {
        let span = tracing::info_span!("run", image = %self.image_name, os = %self.os_type);
        let _enter = span.enter();

        let outcome = self.run_inner();
        if let Err(e) = &outcome {
            tracing::debug!(kind = e.kind(), error = %e, "run failed");
        }
        outcome
    }

    fn run_inner(&self) -> Result<TestSummary> {
        let tool = self.provisioner.provision(&self.os_type, &self.cancel)?;

        let summary =
            self.executor
                .run(&tool.path, &self.test_file_path, &self.image_name, &self.cancel)?;

        tracing::debug!("Successfully finished testing");
        tracing::info!(
            total = summary.total,
            pass = summary.pass,
            fail = summary.fail,
            duration_ms = summary.duration,
            "{summary}"
        );
        Ok(summary)
    }

    /// Run on a worker thread. The returned handle can cancel or wait for it.
    pub fn spawn(self) -> RunHandle {
        let cancel = self.cancel.clone();
        let handle = thread::spawn(move || self.run());
        RunHandle { cancel, handle }
    }
}

/// A run in progress on a worker thread
pub struct RunHandle {
    cancel: CancellationToken,
    handle: JoinHandle<Result<TestSummary>>,
}

impl RunHandle {
    /// Request cancellation; [`join`](Self::join) then yields `Cancelled`
    /// unless the run had already finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run. A panic on the worker is resumed on this thread.
    pub fn join(self) -> Result<TestSummary> {
        match self.handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
