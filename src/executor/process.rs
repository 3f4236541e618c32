//! Low-level subprocess execution with output capture, timeout and cancellation

use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

use crate::cancel::CancellationToken;

/// How often the wait loop wakes up to check for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Timeout for collecting output from child process pipes
const OUTPUT_COLLECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum captured size per stream (10MB)
pub(crate) const MAX_OUTPUT_SIZE: usize = 10 * 1024 * 1024;

/// Everything observed about one subprocess call
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Set when the process could not start, was killed, or could not be waited on
    pub invocation_error: Option<String>,
    pub duration: Duration,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl ExecutionResult {
    /// Started, exited on its own, and exited 0.
    pub fn succeeded(&self) -> bool {
        self.invocation_error.is_none() && self.exit_code == Some(0)
    }

    fn not_started(error: String, duration: Duration) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            invocation_error: Some(error),
            duration,
            timed_out: false,
            cancelled: false,
        }
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
    Failed(std::io::Error),
}

/// Run `program` with a discrete argument vector. No shell is involved, so
/// argument values reach the program byte for byte.
///
/// Never returns an error: failure to start, timeouts and cancellation are
/// all reported through [`ExecutionResult::invocation_error`].
pub fn run_program(
    program: &Path,
    args: &[OsString],
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> ExecutionResult {
    let start = Instant::now();

    if cancel.is_cancelled() {
        let mut result =
            ExecutionResult::not_started("cancelled before start".to_string(), start.elapsed());
        result.cancelled = true;
        return result;
    }

    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return ExecutionResult::not_started(
                format!("failed to spawn {}: {e}", program.display()),
                start.elapsed(),
            )
        }
    };

    // Drain both pipes while waiting; a full pipe buffer would otherwise
    // block the child forever.
    let stdout_rx = drain(child.stdout.take());
    let stderr_rx = drain(child.stderr.take());

    let outcome = wait_for_exit(&mut child, start, timeout, cancel);
    let duration = start.elapsed();

    let stdout = stdout_rx
        .recv_timeout(OUTPUT_COLLECTION_TIMEOUT)
        .unwrap_or_else(|_| "[output collection timed out]".to_string());
    let stderr = stderr_rx
        .recv_timeout(OUTPUT_COLLECTION_TIMEOUT)
        .unwrap_or_else(|_| "[output collection timed out]".to_string());

    let mut result = ExecutionResult {
        exit_code: None,
        stdout,
        stderr,
        invocation_error: None,
        duration,
        timed_out: false,
        cancelled: false,
    };

    match outcome {
        WaitOutcome::Exited(status) => {
            result.exit_code = status.code();
            if let Some(reason) = abnormal_termination(&status) {
                result.invocation_error = Some(reason);
            }
        }
        WaitOutcome::TimedOut => {
            result.timed_out = true;
            result.invocation_error = Some(format!(
                "timed out after {}s",
                timeout.unwrap_or_default().as_secs()
            ));
        }
        WaitOutcome::Cancelled => {
            result.cancelled = true;
            result.invocation_error = Some("cancelled".to_string());
        }
        WaitOutcome::Failed(e) => {
            result.invocation_error = Some(format!("failed to wait for process: {e}"));
        }
    }

    result
}

/// Wait for `child` to exit, waking every [`POLL_INTERVAL`].
///
/// Each wake checks the cancellation token and the deadline. Either one
/// kills and reaps the child before returning, so no zombie is left behind.
fn wait_for_exit(
    child: &mut Child,
    start: Instant,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> WaitOutcome {
    let deadline = timeout.map(|t| start + t);

    loop {
        let slice = match deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(POLL_INTERVAL),
            None => POLL_INTERVAL,
        };

        match child.wait_timeout(slice) {
            Ok(Some(status)) => return WaitOutcome::Exited(status),
            Ok(None) => {
                if cancel.is_cancelled() {
                    kill_child_process(child);
                    return WaitOutcome::Cancelled;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    kill_child_process(child);
                    return WaitOutcome::TimedOut;
                }
            }
            Err(e) => {
                kill_child_process(child);
                return WaitOutcome::Failed(e);
            }
        }
    }
}

/// Reason for a process that ended without exiting normally.
///
/// On Unix this is a signal death. Elsewhere a missing exit code is the only
/// signal available.
#[cfg(unix)]
fn abnormal_termination(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status
        .signal()
        .map(|signal| format!("terminated by signal {signal}"))
}

#[cfg(not(unix))]
fn abnormal_termination(status: &ExitStatus) -> Option<String> {
    status
        .code()
        .is_none()
        .then(|| "terminated without an exit code".to_string())
}

/// Read `stream` to completion on a background thread.
///
/// The result arrives on the returned channel. A missing stream yields an
/// empty string immediately.
fn drain<R: Read + Send + 'static>(stream: Option<R>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    match stream {
        Some(stream) => {
            thread::spawn(move || {
                let _ = tx.send(read_stream_to_string(stream));
            });
        }
        None => {
            let _ = tx.send(String::new());
        }
    }
    rx
}

/// Read a stream to string, handling errors gracefully
///
/// Output is read in chunks up to MAX_OUTPUT_SIZE. Anything beyond is read
/// and discarded, so the child never blocks on a full pipe, and a truncation
/// notice is appended. Invalid UTF-8 is replaced rather than rejected.
pub(crate) fn read_stream_to_string<R: Read>(mut stream: R) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let remaining = MAX_OUTPUT_SIZE.saturating_sub(buf.len());
                let to_copy = n.min(remaining);
                buf.extend_from_slice(&chunk[..to_copy]);
                if to_copy < n {
                    let mut discard = [0u8; 8192];
                    while stream.read(&mut discard).unwrap_or(0) > 0 {}
                    buf.extend_from_slice(b"\n[output truncated at 10MB]");
                    break;
                }
            }
            Err(_) => {
                if buf.is_empty() {
                    return "[error reading output]".to_string();
                }
                break;
            }
        }
    }

    String::from_utf8_lossy(&buf).to_string()
}

/// Terminate a child process
///
/// Sends SIGKILL on Unix and calls TerminateProcess on Windows, then waits
/// for the process so it is reaped.
fn kill_child_process(child: &mut Child) {
    // The process may already be gone
    let _ = child.kill();
    // Reap the zombie
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Cursor;

    #[test]
    fn test_read_stream_small_input() {
        assert_eq!(read_stream_to_string(Cursor::new(b"hello world")), "hello world");
    }

    #[test]
    fn test_read_stream_truncates_at_limit() {
        let data = vec![b'x'; MAX_OUTPUT_SIZE + 1000];
        let result = read_stream_to_string(Cursor::new(data));
        assert!(result.contains("[output truncated at 10MB]"));
        assert!(result.len() <= MAX_OUTPUT_SIZE + 50);
    }

    #[test]
    fn test_read_stream_exact_limit_is_not_truncated() {
        let data = vec![b'y'; MAX_OUTPUT_SIZE];
        let result = read_stream_to_string(Cursor::new(data));
        assert!(!result.contains("[output truncated"));
        assert_eq!(result.len(), MAX_OUTPUT_SIZE);
    }

    #[test]
    #[serial]
    fn test_missing_program_reports_invocation_error() {
        let result = run_program(
            Path::new("/nonexistent/cst-runner-test-binary"),
            &[],
            None,
            &CancellationToken::new(),
        );
        assert!(!result.succeeded());
        assert!(result
            .invocation_error
            .as_deref()
            .unwrap()
            .contains("failed to spawn"));
        assert_eq!(result.exit_code, None);
    }

    #[test]
    fn test_cancelled_before_start_does_not_spawn() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_program(Path::new("/nonexistent/binary"), &[], None, &cancel);
        assert!(result.cancelled);
        assert!(!result.succeeded());
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_captures_stdout_stderr_and_exit_code() {
        let args: Vec<OsString> = ["-c", "echo out; echo err >&2; exit 4"]
            .iter()
            .map(OsString::from)
            .collect();
        let result = run_program(Path::new("/bin/sh"), &args, None, &CancellationToken::new());

        assert_eq!(result.exit_code, Some(4));
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert!(result.invocation_error.is_none());
        assert!(!result.succeeded());
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_timeout_kills_process() {
        let args: Vec<OsString> = ["-c", "exec sleep 30"].iter().map(OsString::from).collect();
        let result = run_program(
            Path::new("/bin/sh"),
            &args,
            Some(Duration::from_millis(300)),
            &CancellationToken::new(),
        );

        assert!(result.timed_out);
        assert!(result.duration < Duration::from_secs(15));
        assert!(!result.succeeded());
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_cancellation_kills_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });

        let args: Vec<OsString> = ["-c", "exec sleep 30"].iter().map(OsString::from).collect();
        let result = run_program(Path::new("/bin/sh"), &args, None, &cancel);
        canceller.join().unwrap();

        assert!(result.cancelled);
        assert!(result.duration < Duration::from_secs(15));
    }
}
