//! Runtime configuration for the compilation pipeline
//!
//! Defaults match the production deployment. The sandbox image, the docker
//! binary and the wall-clock timeout can be overridden from the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::markup::MarkupOptions;

/// Environment variable naming the container image with the TeX toolchain
pub const ENV_IMAGE: &str = "LATEX_LAB_IMAGE";
/// Environment variable overriding the wall-clock timeout (milliseconds)
pub const ENV_TIMEOUT_MS: &str = "LATEX_LAB_TIMEOUT_MS";
/// Environment variable overriding the docker client binary
pub const ENV_DOCKER: &str = "LATEX_LAB_DOCKER";

pub const DEFAULT_IMAGE: &str = "air-latex-lab:latest";
pub const DEFAULT_TIMEOUT_MS: u64 = 25_000;
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_EXTRACTED_BYTES: u64 = 64 * 1024 * 1024;
pub const OUTPUT_CAP_BYTES: usize = 1024 * 1024;

/// Resource caps applied to the sandboxed engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// CPU share, in docker `--cpus` notation
    pub cpus: String,
    /// Memory cap, in docker `--memory` notation
    pub memory: String,
    /// Maximum processes/threads inside the sandbox
    pub pids_limit: u32,
    /// Size of each writable tmpfs scratch mount
    pub scratch_size: String,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            cpus: "1".to_string(),
            memory: "512m".to_string(),
            pids_limit: 256,
            scratch_size: "64m".to_string(),
        }
    }
}

/// Input-side ceilings enforced by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputLimits {
    pub max_upload_bytes: usize,
    /// Total decompressed bytes read out of a zip or docx
    pub max_extracted_bytes: u64,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: MAX_UPLOAD_BYTES,
            max_extracted_bytes: MAX_EXTRACTED_BYTES,
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub image: String,
    pub docker_binary: String,
    pub timeout_ms: u64,
    pub limits: SandboxLimits,
    pub input: InputLimits,
    /// Per-stream cap on captured stdout/stderr
    pub output_cap_bytes: usize,
    pub markup: MarkupOptions,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            docker_binary: "docker".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            limits: SandboxLimits::default(),
            input: InputLimits::default(),
            output_cap_bytes: OUTPUT_CAP_BYTES,
            markup: MarkupOptions::default(),
        }
    }
}

impl LabConfig {
    /// Defaults with overrides read from the process environment
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Unparseable or empty values are ignored with a warning.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(image) = lookup(ENV_IMAGE).filter(|v| !v.trim().is_empty()) {
            self.image = image.trim().to_string();
        }
        if let Some(docker) = lookup(ENV_DOCKER).filter(|v| !v.trim().is_empty()) {
            self.docker_binary = docker.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.timeout_ms = ms,
                _ => tracing::warn!("Ignoring invalid {}={:?}", ENV_TIMEOUT_MS, raw),
            }
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = LabConfig::default();
        assert_eq!(config.image, "air-latex-lab:latest");
        assert_eq!(config.timeout(), Duration::from_secs(25));
        assert_eq!(config.input.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.limits.pids_limit, 256);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_IMAGE, "registry.local/tex:2024"),
            (ENV_TIMEOUT_MS, "5000"),
        ]
        .into_iter()
        .collect();

        let config =
            LabConfig::default().with_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.image, "registry.local/tex:2024");
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.docker_binary, "docker");
    }

    #[test]
    fn test_invalid_timeout_ignored() {
        let config = LabConfig::default().with_overrides(|key| {
            (key == ENV_TIMEOUT_MS).then(|| "soon".to_string())
        });
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_partial_json_config_uses_defaults() {
        let config: LabConfig = serde_json::from_str(r#"{"timeout_ms": 1000}"#).unwrap();
        assert_eq!(config.timeout_ms, 1000);
        assert_eq!(config.image, DEFAULT_IMAGE);
        assert_eq!(config.limits, SandboxLimits::default());
    }
}
