//! Bounded subprocess runner
//!
//! Runs a command with stdin closed, captures at most `cap` bytes of each
//! output stream (the rest is read and discarded so the child never blocks on
//! a full pipe) and kills the child once the timeout elapses.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CapturedOutput, CapturedStream, ExecutionOutcome};

/// How long stream readers may keep draining after the child has exited
const DRAIN_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

/// Run `command` to completion or until `timeout`
pub async fn run_bounded(mut command: Command, timeout: Duration, cap: usize) -> ExecutionOutcome {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ExecutionOutcome::LaunchError {
                reason: e.to_string(),
            }
        }
    };

    let mut stdout_task = tokio::spawn(read_capped(child.stdout.take(), cap));
    let mut stderr_task = tokio::spawn(read_capped(child.stderr.take(), cap));

    let waited = tokio::time::timeout(timeout, child.wait()).await;

    let status = match waited {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            warn!("Failed to wait for child process: {}", e);
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            return ExecutionOutcome::LaunchError {
                reason: format!("wait failed: {}", e),
            };
        }
        Err(_elapsed) => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill timed out child process: {}", e);
            }
            None
        }
    };

    let output = CapturedOutput {
        stdout: join_capture(&mut stdout_task).await,
        stderr: join_capture(&mut stderr_task).await,
    };

    match status {
        Some(status) if status.success() => ExecutionOutcome::Succeeded { output },
        Some(status) => {
            debug!(code = ?status.code(), "Child exited unsuccessfully");
            ExecutionOutcome::Failed {
                exit_code: status.code(),
                output,
            }
        }
        None => ExecutionOutcome::TimedOut {
            after: timeout,
            output,
        },
    }
}

async fn read_capped<R>(reader: Option<R>, cap: usize) -> CapturedStream
where
    R: AsyncRead + Unpin,
{
    let mut captured = CapturedStream::default();
    let Some(mut reader) = reader else {
        return captured;
    };

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Stopped reading child output: {}", e);
                break;
            }
        };

        let room = cap.saturating_sub(captured.data.len());
        captured.data.extend_from_slice(&buf[..n.min(room)]);
        if n > room {
            captured.truncated = true;
        }
    }
    captured
}

/// Collect a reader task, giving up if a surviving grandchild keeps the pipe open
async fn join_capture(task: &mut JoinHandle<CapturedStream>) -> CapturedStream {
    match tokio::time::timeout(DRAIN_GRACE, &mut *task).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("Output reader failed: {}", e);
            CapturedStream::default()
        }
        Err(_) => {
            task.abort();
            CapturedStream {
                data: Vec::new(),
                truncated: true,
            }
        }
    }
}
