//! Docker-backed sandbox
//!
//! Each run starts a throwaway container with no network, no capabilities, a
//! read-only root filesystem and small tmpfs scratch mounts. The workspace is
//! the only writable bind mount.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use super::process::run_bounded;
use super::{ExecutionOutcome, Sandbox};
use crate::compiler::output::WorkspaceFile;
use crate::config::{LabConfig, SandboxLimits};

/// Mount point of the workspace inside the container
pub const CONTAINER_WORKDIR: &str = "/data";

/// Budget for the best-effort `docker kill` after a timeout
const KILL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DockerSandbox {
    docker_binary: String,
    image: String,
    limits: SandboxLimits,
    output_cap_bytes: usize,
}

impl DockerSandbox {
    pub fn new(config: &LabConfig) -> Self {
        Self {
            docker_binary: config.docker_binary.clone(),
            image: config.image.clone(),
            limits: config.limits.clone(),
            output_cap_bytes: config.output_cap_bytes,
        }
    }

    /// Arguments for `docker run`, given the container name and host workdir
    pub fn run_args(&self, container_name: &str, workdir: &Path) -> Vec<String> {
        let scratch = |mount: &str| {
            format!(
                "{}:rw,noexec,nosuid,size={}",
                mount, self.limits.scratch_size
            )
        };

        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "--name".into(),
            container_name.into(),
            "--network=none".into(),
            format!("--cpus={}", self.limits.cpus),
            format!("--memory={}", self.limits.memory),
            format!("--pids-limit={}", self.limits.pids_limit),
            "--security-opt=no-new-privileges".into(),
            "--cap-drop=ALL".into(),
            "--read-only".into(),
            "--tmpfs".into(),
            scratch("/tmp"),
            "--tmpfs".into(),
            scratch("/var/tmp"),
        ];

        for (key, value) in [
            ("HOME", "/tmp"),
            ("TEXMFVAR", "/tmp/texmf-var"),
            ("TEXMFCONFIG", "/tmp/texmf-config"),
            ("TEXMFCACHE", "/tmp/texmf-cache"),
        ] {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }

        args.push("-v".into());
        args.push(format!("{}:{}:rw", workdir.display(), CONTAINER_WORKDIR));
        args.push(self.image.clone());
        args.push(WorkspaceFile::Source.file_name().into());
        args
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.docker_binary);
        command.args(args).env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        command
    }

    /// Stop a container whose client process was killed
    async fn kill_container(&self, container_name: &str) {
        let args = vec!["kill".to_string(), container_name.to_string()];
        let outcome = run_bounded(self.command(&args), KILL_TIMEOUT, 4096).await;
        if !outcome.is_success() {
            warn!(
                container = container_name,
                "Could not kill container: {}",
                outcome.summary()
            );
        }
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn run(&self, workdir: &Path, timeout: Duration) -> ExecutionOutcome {
        let container_name = format!("latex-lab-{}", Uuid::new_v4());
        let args = self.run_args(&container_name, workdir);
        info!(
            container = %container_name,
            image = %self.image,
            timeout_ms = timeout.as_millis() as u64,
            "Starting sandbox"
        );

        let outcome = run_bounded(self.command(&args), timeout, self.output_cap_bytes).await;

        if matches!(outcome, ExecutionOutcome::TimedOut { .. }) {
            self.kill_container(&container_name).await;
        }
        info!(container = %container_name, "{}", outcome.summary());
        outcome
    }

    fn describe(&self) -> String {
        format!("docker ({})", self.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn test_run_args() {
        let sandbox = DockerSandbox::new(&LabConfig::default());
        let args = sandbox.run_args("latex-lab-test", &PathBuf::from("/tmp/latex-lab-abc"));

        let expected: Vec<String> = [
            "run",
            "--rm",
            "--name",
            "latex-lab-test",
            "--network=none",
            "--cpus=1",
            "--memory=512m",
            "--pids-limit=256",
            "--security-opt=no-new-privileges",
            "--cap-drop=ALL",
            "--read-only",
            "--tmpfs",
            "/tmp:rw,noexec,nosuid,size=64m",
            "--tmpfs",
            "/var/tmp:rw,noexec,nosuid,size=64m",
            "-e",
            "HOME=/tmp",
            "-e",
            "TEXMFVAR=/tmp/texmf-var",
            "-e",
            "TEXMFCONFIG=/tmp/texmf-config",
            "-e",
            "TEXMFCACHE=/tmp/texmf-cache",
            "-v",
            "/tmp/latex-lab-abc:/data:rw",
            "air-latex-lab:latest",
            "main.tex",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        assert_eq!(args, expected);
    }

    #[test]
    fn test_limits_are_configurable() {
        let config = LabConfig {
            image: "tex:slim".to_string(),
            limits: SandboxLimits {
                cpus: "0.5".to_string(),
                memory: "256m".to_string(),
                pids_limit: 64,
                scratch_size: "16m".to_string(),
            },
            ..LabConfig::default()
        };
        let sandbox = DockerSandbox::new(&config);
        let args = sandbox.run_args("c", Path::new("/w"));

        assert!(args.contains(&"--cpus=0.5".to_string()));
        assert!(args.contains(&"--memory=256m".to_string()));
        assert!(args.contains(&"--pids-limit=64".to_string()));
        assert!(args.contains(&"/tmp:rw,noexec,nosuid,size=16m".to_string()));
        assert_eq!(args[args.len() - 2], "tex:slim");
        assert_eq!(sandbox.describe(), "docker (tex:slim)");
    }

    #[tokio::test]
    async fn test_missing_docker_binary_is_launch_error() {
        let config = LabConfig {
            docker_binary: "/nonexistent/docker".to_string(),
            ..LabConfig::default()
        };
        let sandbox = DockerSandbox::new(&config);
        let dir = tempfile::tempdir().unwrap();
        let outcome = sandbox.run(dir.path(), Duration::from_secs(1)).await;
        assert!(matches!(outcome, ExecutionOutcome::LaunchError { .. }));
    }
}
