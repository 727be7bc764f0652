//! Sandboxed execution of the TeX engine
//!
//! The pipeline only ever talks to a [`Sandbox`]: one call that runs the engine
//! over a prepared workspace and reports an [`ExecutionOutcome`]. The
//! production implementation is [`DockerSandbox`]; tests substitute scripted
//! fakes.

pub mod docker;
pub mod process;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

pub use docker::DockerSandbox;
pub use process::run_bounded;

/// Something that can compile `main.tex` inside a workspace directory
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run the engine over `workdir`, writing `main.pdf`/`main.log` there.
    ///
    /// Implementations must not return before the engine has stopped and must
    /// give up once `timeout` has elapsed.
    async fn run(&self, workdir: &Path, timeout: Duration) -> ExecutionOutcome;

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// Line appended to output that hit its cap
pub const TRUNCATED_MARKER: &str = "[output truncated]";

/// Bytes captured from one output stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedStream {
    pub data: Vec<u8>,
    /// More bytes were produced than the cap allowed
    pub truncated: bool,
}

/// stdout and stderr of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
}

impl CapturedStream {
    /// Lossy text, ending in a marker line when bytes were dropped
    pub fn to_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.truncated {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(TRUNCATED_MARKER);
            text.push('\n');
        }
        text
    }
}

impl CapturedOutput {
    /// Both streams as text, stdout first
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for stream in [&self.stdout, &self.stderr] {
            if stream.data.is_empty() {
                continue;
            }
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stream.to_text());
        }
        text
    }
}

/// How a sandbox run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Exited with status zero
    Succeeded { output: CapturedOutput },
    /// Exited with a non-zero status, or was killed by a signal
    Failed {
        exit_code: Option<i32>,
        output: CapturedOutput,
    },
    /// Killed after running past the timeout
    TimedOut {
        after: Duration,
        output: CapturedOutput,
    },
    /// Never started
    LaunchError { reason: String },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded { .. })
    }

    pub fn output(&self) -> Option<&CapturedOutput> {
        match self {
            ExecutionOutcome::Succeeded { output }
            | ExecutionOutcome::Failed { output, .. }
            | ExecutionOutcome::TimedOut { output, .. } => Some(output),
            ExecutionOutcome::LaunchError { .. } => None,
        }
    }

    /// One line for the log
    pub fn summary(&self) -> String {
        match self {
            ExecutionOutcome::Succeeded { .. } => "Engine exited successfully".to_string(),
            ExecutionOutcome::Failed {
                exit_code: Some(code),
                ..
            } => format!("Engine exited with status {}", code),
            ExecutionOutcome::Failed { exit_code: None, .. } => {
                "Engine was terminated by a signal".to_string()
            }
            ExecutionOutcome::TimedOut { after, .. } => {
                format!("Engine killed after {} ms", after.as_millis())
            }
            ExecutionOutcome::LaunchError { reason } => {
                format!("Sandbox could not be started: {}", reason)
            }
        }
    }
}
