//! Shared helpers for pipeline integration tests

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use latex_engine::sandbox::{CapturedOutput, CapturedStream, ExecutionOutcome, Sandbox};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
pub const FAKE_PDF: &[u8] = b"%PDF-1.5\n%fake\n";
pub const FLOOD_LOG_BYTES: usize = 256 * 1024;

/// What the scripted engine does when run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Write main.pdf and main.log, exit 0
    Compile,
    /// Write main.log only, exit 1
    Error,
    /// Exit 0 without writing anything
    NoPdf,
    /// Report a timeout
    Hang,
    /// Report that the container could not start
    NoDocker,
    /// Write a main.log of `FLOOD_LOG_BYTES`, exit 1
    FloodLog,
}

/// A workspace as the engine saw it
#[derive(Debug, Clone)]
pub struct SeenRun {
    pub workdir: PathBuf,
    pub latex: String,
    pub files: Vec<String>,
}

pub struct ScriptedSandbox {
    script: Script,
    runs: Mutex<Vec<SeenRun>>,
}

impl ScriptedSandbox {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn runs(&self) -> Vec<SeenRun> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn run(&self, workdir: &Path, timeout: Duration) -> ExecutionOutcome {
        let latex = fs::read_to_string(workdir.join("main.tex")).unwrap_or_default();
        self.runs.lock().unwrap().push(SeenRun {
            workdir: workdir.to_path_buf(),
            latex,
            files: list_files(workdir),
        });

        let output = CapturedOutput {
            stdout: CapturedStream {
                data: b"This is pdfTeX, Version 3.141592653\n".to_vec(),
                truncated: false,
            },
            stderr: CapturedStream::default(),
        };

        match self.script {
            Script::Compile => {
                fs::write(workdir.join("main.pdf"), FAKE_PDF).unwrap();
                fs::write(workdir.join("main.log"), "Output written on main.pdf (1 page).\n")
                    .unwrap();
                ExecutionOutcome::Succeeded { output }
            }
            Script::Error => {
                fs::write(
                    workdir.join("main.log"),
                    "! Undefined control sequence.\nl.12 \\foo\n",
                )
                .unwrap();
                ExecutionOutcome::Failed {
                    exit_code: Some(1),
                    output,
                }
            }
            Script::NoPdf => ExecutionOutcome::Succeeded { output },
            Script::Hang => ExecutionOutcome::TimedOut {
                after: timeout,
                output: CapturedOutput::default(),
            },
            Script::FloodLog => {
                fs::write(workdir.join("main.log"), vec![b'm'; FLOOD_LOG_BYTES]).unwrap();
                ExecutionOutcome::Failed {
                    exit_code: Some(1),
                    output,
                }
            }
            Script::NoDocker => ExecutionOutcome::LaunchError {
                reason: "No such file or directory (os error 2)".to_string(),
            },
        }
    }

    fn describe(&self) -> String {
        format!("scripted ({:?})", self.script)
    }
}

/// Relative paths of all files under `root`, sorted
pub fn list_files(root: &Path) -> Vec<String> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out);
            } else if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }

    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

/// Build an in-memory zip from `(name, bytes)` pairs
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Names inside a zip archive, sorted
pub fn zip_names(bytes: &[u8]) -> Vec<String> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}
