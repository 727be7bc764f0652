//! Error types for the compilation pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure class reported in a [`CompileResult`](super::CompileResult)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InputRejected,
    Conversion,
    Launch,
    CompileFailed,
    Timeout,
    MissingArtifact,
    Internal,
}

/// Reasons an upload is refused before anything is executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Upload is larger than the configured ceiling
    TooLarge { limit: usize },
    /// Extension is not one of .md, .docx, .zip
    UnsupportedFormat(String),
    /// Zip bundle without a root-level main.md
    MissingRootDocument,
    /// Archive expands past the extraction ceiling
    ArchiveTooLarge { limit: u64 },
    /// Markup contains data-URI image payloads
    InlineImages,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::TooLarge { limit } => {
                write!(f, "File exceeds {} MB limit.", mebibytes(*limit as u64))
            }
            Rejection::UnsupportedFormat(_) => {
                write!(f, "Only .md, .docx, or .zip files are supported.")
            }
            Rejection::MissingRootDocument => {
                write!(f, "Bundle must include a main.md file at the root.")
            }
            Rejection::ArchiveTooLarge { limit } => write!(
                f,
                "Archive contents exceed {} MB when extracted.",
                mebibytes(*limit)
            ),
            Rejection::InlineImages => write!(
                f,
                "Base64 images are not supported. Upload images via zip bundle or use .docx."
            ),
        }
    }
}

/// Whole MiB, rounded up so a non-zero limit never reads as 0
fn mebibytes(bytes: u64) -> u64 {
    bytes.div_ceil(1024 * 1024)
}

/// Pipeline errors
#[derive(Error, Debug)]
pub enum LabError {
    #[error("Input rejected: {0}")]
    InputRejected(Rejection),

    #[error("Conversion error: {detail}")]
    Conversion { detail: String },

    #[error("Sandbox launch failed: {reason}")]
    Launch { reason: String },

    #[error("Compiler exited with status {}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    CompileFailed { exit_code: Option<i32> },

    #[error("Compilation timeout after {0}ms")]
    Timeout(u64),

    #[error("Compiler reported success but produced no PDF")]
    MissingArtifact,

    #[error("Workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

impl LabError {
    pub fn conversion(detail: impl Into<String>) -> Self {
        LabError::Conversion {
            detail: detail.into(),
        }
    }

    /// The failure class for this error
    pub fn kind(&self) -> FailureKind {
        match self {
            LabError::InputRejected(_) => FailureKind::InputRejected,
            LabError::Conversion { .. } => FailureKind::Conversion,
            LabError::Launch { .. } => FailureKind::Launch,
            LabError::CompileFailed { .. } => FailureKind::CompileFailed,
            LabError::Timeout(_) => FailureKind::Timeout,
            LabError::MissingArtifact => FailureKind::MissingArtifact,
            LabError::Workspace(_) => FailureKind::Internal,
        }
    }

    /// Message that is safe to show to the person who uploaded the file.
    ///
    /// Toolchain diagnostics never appear here; they belong in the log text.
    pub fn user_message(&self) -> String {
        match self {
            LabError::InputRejected(rejection) => rejection.to_string(),
            LabError::Conversion { .. } => {
                "Unable to read input. Provide a valid .md, .docx, or .zip with main.md."
                    .to_string()
            }
            LabError::Launch { .. } => {
                "The compilation sandbox could not be started. Please try again later."
                    .to_string()
            }
            LabError::CompileFailed { .. } => {
                "LaTeX compilation failed. Check the logs for details.".to_string()
            }
            LabError::Timeout(ms) => {
                let seconds = ms.div_ceil(1000);
                format!(
                    "Compilation timed out after {} second{}. Try simplifying the document.",
                    seconds,
                    if seconds == 1 { "" } else { "s" }
                )
            }
            LabError::MissingArtifact => "PDF was not generated.".to_string(),
            LabError::Workspace(_) => {
                "Internal error while preparing the compilation workspace.".to_string()
            }
        }
    }

    /// Detail worth keeping in the log, if any
    pub fn log_detail(&self) -> Option<String> {
        match self {
            LabError::InputRejected(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl From<Rejection> for LabError {
    fn from(rejection: Rejection) -> Self {
        LabError::InputRejected(rejection)
    }
}
