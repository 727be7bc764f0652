//! Manuscript compilation engine
//!
//! Turns an uploaded manuscript (Markdown, DOCX, or a zip bundle with
//! `main.md` and images) into a PDF by generating LaTeX and compiling it in
//! a locked-down container:
//! - Input resolution with size limits, archive guards and asset sanitizing
//! - Markdown to LaTeX translation with escaping of all user text
//! - Template assembly with title/author/DOI metadata
//! - Sandboxed compilation with a hard timeout and bounded output capture
//! - Result collection, optional debug bundle, guaranteed workspace cleanup

pub mod compiler;
pub mod config;
pub mod input;
pub mod markup;
pub mod sandbox;
pub mod templates;

pub use compiler::{
    prepare_source, CompileInput, CompileResult, DocumentMeta, FailureKind, LabError, LatexLab,
    PreparedSource,
};
pub use config::LabConfig;
pub use sandbox::{DockerSandbox, ExecutionOutcome, Sandbox};
