//! Compilation pipeline: request types, source preparation and the
//! sandboxed compile

pub mod errors;
pub mod output;
pub mod pipeline;
pub mod workspace;

pub use errors::{FailureKind, LabError, Rejection};
pub use output::WorkspaceFile;
pub use workspace::EphemeralWorkspace;

use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};
use tracing::{info, warn};

use crate::config::LabConfig;
use crate::input::{resolve_input, AssetMap};
use crate::markup::markdown_to_latex_with_assets;
use crate::sandbox::Sandbox;
use crate::templates::build_latex_document;

/// Display metadata for the title block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMeta {
    pub title: String,
    pub authors: String,
    /// DOI or other persistent identifier
    pub identifier: Option<String>,
    pub received_date: Option<String>,
    pub accepted_date: Option<String>,
    pub published_date: Option<String>,
}

/// One compilation request
#[derive(Debug, Clone)]
pub struct CompileInput {
    pub filename: String,
    pub content: Vec<u8>,
    pub metadata: DocumentMeta,
    /// Return a zip of the workspace alongside the result
    pub debug: bool,
}

/// Everything written into a workspace before the engine runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSource {
    pub markdown: String,
    pub latex: String,
    pub assets: AssetMap,
    pub notices: Vec<String>,
}

/// Outcome of a compilation request
#[derive(Debug, Clone, Serialize)]
pub struct CompileResult {
    pub ok: bool,
    #[serde(rename = "pdf_bytes", serialize_with = "byte_len")]
    pub pdf: Option<Vec<u8>>,
    pub log_text: String,
    #[serde(rename = "bundle_bytes", serialize_with = "byte_len")]
    pub bundle: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

fn byte_len<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    bytes.as_ref().map(Vec::len).serialize(serializer)
}

impl CompileResult {
    pub fn success(pdf: Vec<u8>, log_text: String, bundle: Option<Vec<u8>>) -> Self {
        Self {
            ok: true,
            pdf: Some(pdf),
            log_text,
            bundle,
            user_message: None,
            failure: None,
        }
    }

    pub fn failure(error: &LabError, log_text: String, bundle: Option<Vec<u8>>) -> Self {
        Self {
            ok: false,
            pdf: None,
            log_text,
            bundle,
            user_message: Some(error.user_message()),
            failure: Some(error.kind()),
        }
    }
}

/// Resolve, translate and assemble an upload into a LaTeX source tree.
///
/// Pure: the same input and configuration always produce the same source.
pub fn prepare_source(input: &CompileInput, config: &LabConfig) -> Result<PreparedSource, LabError> {
    let document = resolve_input(&input.filename, &input.content, &config.input)?;
    let body =
        markdown_to_latex_with_assets(&document.markdown, &config.markup, &document.assets);
    let latex = build_latex_document(&body, &input.metadata);

    Ok(PreparedSource {
        markdown: document.markdown,
        latex,
        assets: document.assets,
        notices: document.notices,
    })
}

/// The compilation service
#[derive(Clone)]
pub struct LatexLab {
    config: LabConfig,
    sandbox: Arc<dyn Sandbox>,
}

impl LatexLab {
    pub fn new(config: LabConfig, sandbox: Arc<dyn Sandbox>) -> Self {
        Self { config, sandbox }
    }

    /// Compile an upload. Never fails: every error is reported in the result.
    pub async fn compile(&self, input: &CompileInput) -> CompileResult {
        info!(filename = %input.filename, bytes = input.content.len(), "Compile requested");

        let source = match prepare_source(input, &self.config) {
            Ok(source) => source,
            Err(err) => {
                warn!("Rejected before compilation: {}", err);
                return CompileResult::failure(&err, err.log_detail().unwrap_or_default(), None);
            }
        };

        pipeline::execute(self.sandbox.as_ref(), &source, &self.config, input.debug).await
    }
}
