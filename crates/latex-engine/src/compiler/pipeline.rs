//! Execute and collect: run the sandbox over a fresh workspace and turn what
//! it left behind into a [`CompileResult`]

use tracing::{debug, info, warn};

use super::errors::LabError;
use super::output::WorkspaceFile;
use super::workspace::EphemeralWorkspace;
use super::{CompileResult, PreparedSource};
use crate::config::LabConfig;
use crate::sandbox::{ExecutionOutcome, Sandbox};

/// Run one compilation. The workspace is removed before this returns,
/// whatever the outcome.
pub async fn execute(
    sandbox: &dyn Sandbox,
    source: &PreparedSource,
    config: &LabConfig,
    debug: bool,
) -> CompileResult {
    let workspace = match EphemeralWorkspace::create() {
        Ok(workspace) => workspace,
        Err(e) => {
            let err = LabError::Workspace(e);
            warn!("{}", err);
            return CompileResult::failure(&err, with_notices(&source.notices, err.to_string()), None);
        }
    };

    let result = run_in_workspace(sandbox, &workspace, source, config, debug).await;
    workspace.close();
    result
}

async fn run_in_workspace(
    sandbox: &dyn Sandbox,
    workspace: &EphemeralWorkspace,
    source: &PreparedSource,
    config: &LabConfig,
    debug: bool,
) -> CompileResult {
    if let Err(e) = workspace.write_source_tree(source) {
        let err = LabError::Workspace(e);
        warn!("{}", err);
        let bundle = debug_bundle(workspace, config, debug);
        return CompileResult::failure(&err, with_notices(&source.notices, err.to_string()), bundle);
    }

    info!(
        sandbox = %sandbox.describe(),
        workdir = %workspace.path().display(),
        assets = source.assets.len(),
        "Running engine"
    );
    let outcome = sandbox.run(workspace.path(), config.timeout()).await;
    debug!("{}", outcome.summary());

    let log_text = with_notices(
        &source.notices,
        engine_log(workspace, &outcome, config.output_cap_bytes),
    );
    let bundle = debug_bundle(workspace, config, debug);

    let err = match outcome {
        ExecutionOutcome::Succeeded { .. } => match workspace.read(WorkspaceFile::Pdf) {
            Ok(Some(pdf)) => {
                info!(bytes = pdf.len(), "PDF produced");
                return CompileResult::success(pdf, log_text, bundle);
            }
            Ok(None) => LabError::MissingArtifact,
            Err(e) => LabError::Workspace(e),
        },
        ExecutionOutcome::Failed { exit_code, .. } => LabError::CompileFailed { exit_code },
        ExecutionOutcome::TimedOut { after, .. } => LabError::Timeout(after.as_millis() as u64),
        ExecutionOutcome::LaunchError { reason } => LabError::Launch { reason },
    };

    warn!("Compilation failed: {}", err);
    CompileResult::failure(&err, log_text, bundle)
}

/// `main.log` if the engine wrote one, otherwise its captured output.
///
/// The log file is held to the same cap as captured output. Anything but a
/// clean exit gets a closing line saying how the run ended.
fn engine_log(workspace: &EphemeralWorkspace, outcome: &ExecutionOutcome, cap: usize) -> String {
    let mut log = match workspace.read_capped(WorkspaceFile::Log, cap) {
        Ok(Some(stream)) => stream.to_text(),
        Ok(None) => outcome.output().map(|o| o.to_text()).unwrap_or_default(),
        Err(e) => {
            warn!("Could not read {}: {}", WorkspaceFile::Log, e);
            outcome.output().map(|o| o.to_text()).unwrap_or_default()
        }
    };

    if !outcome.is_success() {
        if !log.is_empty() && !log.ends_with('\n') {
            log.push('\n');
        }
        log.push_str(&outcome.summary());
        log.push('\n');
    }
    log
}

/// Entries are capped like the inputs that went in
fn debug_bundle(
    workspace: &EphemeralWorkspace,
    config: &LabConfig,
    debug: bool,
) -> Option<Vec<u8>> {
    if !debug {
        return None;
    }
    match workspace.bundle(config.input.max_extracted_bytes) {
        Ok(bundle) => Some(bundle),
        Err(e) => {
            warn!("Failed to build debug bundle: {}", e);
            None
        }
    }
}

/// Advisory notices go ahead of the engine output
fn with_notices(notices: &[String], log: String) -> String {
    if notices.is_empty() {
        return log;
    }
    format!("{}\n\n{}", notices.join("\n"), log)
}
