//! LaTeX Lab command-line front end
//!
//! Compiles a local manuscript through the same pipeline the service uses.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use latex_engine::config::{ENV_DOCKER, ENV_IMAGE, ENV_TIMEOUT_MS};
use latex_engine::{
    prepare_source, CompileInput, CompileResult, DockerSandbox, DocumentMeta, LabConfig, LatexLab,
};

#[derive(Parser, Debug)]
#[command(name = "latex-lab")]
#[command(
    version,
    about = "Compile a Markdown, DOCX or zip manuscript to PDF in a sandbox"
)]
struct Args {
    /// Manuscript to compile (.md, .docx or .zip with main.md)
    input: PathBuf,

    #[arg(long, default_value = "")]
    title: String,

    #[arg(long, default_value = "")]
    authors: String,

    /// DOI shown in the title block and footer
    #[arg(long)]
    doi: Option<String>,

    #[arg(long)]
    received: Option<String>,

    #[arg(long)]
    accepted: Option<String>,

    #[arg(long)]
    published: Option<String>,

    /// Also produce a zip of the compilation workspace
    #[arg(long)]
    debug: bool,

    /// Where to write the PDF (or main.tex with --source-only)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Where to write the compilation log
    #[arg(long)]
    log_out: Option<PathBuf>,

    /// Where to write the debug bundle (implies --debug)
    #[arg(long)]
    bundle_out: Option<PathBuf>,

    /// Only generate main.tex, do not compile
    #[arg(long)]
    source_only: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Container image with the TeX toolchain
    #[arg(long, env = ENV_IMAGE)]
    image: Option<String>,

    /// Compilation timeout in milliseconds
    #[arg(long, env = ENV_TIMEOUT_MS)]
    timeout_ms: Option<u64>,

    /// Docker client binary
    #[arg(long, env = ENV_DOCKER)]
    docker: Option<String>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> LabConfig {
        let mut config = LabConfig::from_env();
        if let Some(image) = &self.image {
            config.image = image.clone();
        }
        if let Some(ms) = self.timeout_ms.filter(|ms| *ms > 0) {
            config.timeout_ms = ms;
        }
        if let Some(docker) = &self.docker {
            config.docker_binary = docker.clone();
        }
        config
    }

    fn metadata(&self) -> DocumentMeta {
        DocumentMeta {
            title: self.title.clone(),
            authors: self.authors.clone(),
            identifier: self.doi.clone(),
            received_date: self.received.clone(),
            accepted_date: self.accepted.clone(),
            published_date: self.published.clone(),
        }
    }

    fn wants_bundle(&self) -> bool {
        self.debug || self.bundle_out.is_some()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.config();
    let content = fs::read(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let filename = args
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let input = CompileInput {
        filename,
        content,
        metadata: args.metadata(),
        debug: args.wants_bundle(),
    };

    if args.source_only {
        let source = prepare_source(&input, &config)
            .map_err(|e| anyhow::anyhow!("{}", e.user_message()))?;
        for notice in &source.notices {
            eprintln!("{}", notice);
        }
        match &args.out {
            Some(path) => write_file(path, source.latex.as_bytes())?,
            None => print!("{}", source.latex),
        }
        return Ok(());
    }

    tracing::info!("Starting LaTeX Lab v{}", env!("CARGO_PKG_VERSION"));
    let sandbox = Arc::new(DockerSandbox::new(&config));
    let lab = LatexLab::new(config, sandbox);
    let result = lab.compile(&input).await;

    write_outputs(&args, &input, &result)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if let Some(message) = &result.user_message {
        eprintln!("{}", message);
    }

    if !result.ok {
        std::process::exit(1);
    }
    Ok(())
}

fn write_outputs(args: &Args, input: &CompileInput, result: &CompileResult) -> Result<()> {
    if let Some(pdf) = &result.pdf {
        let path = args
            .out
            .clone()
            .unwrap_or_else(|| default_pdf_path(&args.input, &input.filename));
        write_file(&path, pdf)?;
        if !args.json {
            println!("Wrote {}", path.display());
        }
    }

    if let Some(path) = &args.log_out {
        write_file(path, result.log_text.as_bytes())?;
    }

    if let Some(bundle) = &result.bundle {
        let path = args
            .bundle_out
            .clone()
            .unwrap_or_else(|| args.input.with_extension("debug.zip"));
        write_file(&path, bundle)?;
    }
    Ok(())
}

/// `paper.md` -> `paper.pdf` next to the input
fn default_pdf_path(input: &Path, filename: &str) -> PathBuf {
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);
    input.with_file_name(format!("{}.pdf", stem))
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_args_to_metadata() {
        let args = Args::try_parse_from([
            "latex-lab",
            "paper.zip",
            "--title",
            "On Things",
            "--authors",
            "A. Person",
            "--doi",
            "10.1/x",
        ])
        .unwrap();

        let meta = args.metadata();
        assert_eq!(meta.title, "On Things");
        assert_eq!(meta.identifier.as_deref(), Some("10.1/x"));
        assert!(meta.received_date.is_none());
        assert!(!args.wants_bundle());
    }

    #[test]
    fn test_bundle_out_implies_debug() {
        let args =
            Args::try_parse_from(["latex-lab", "a.md", "--bundle-out", "b.zip"]).unwrap();
        assert!(args.wants_bundle());
    }

    #[test]
    fn test_flag_overrides_config() {
        let args = Args::try_parse_from([
            "latex-lab",
            "a.md",
            "--image",
            "tex:test",
            "--timeout-ms",
            "1234",
            "--docker",
            "podman",
        ])
        .unwrap();
        let config = args.config();
        assert_eq!(config.image, "tex:test");
        assert_eq!(config.timeout_ms, 1234);
        assert_eq!(config.docker_binary, "podman");
    }

    #[test]
    fn test_default_pdf_path() {
        assert_eq!(
            default_pdf_path(Path::new("/work/paper.docx"), "paper.docx"),
            PathBuf::from("/work/paper.pdf")
        );
    }
}
