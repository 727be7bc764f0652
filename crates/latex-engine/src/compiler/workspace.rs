//! Ephemeral compilation workspace
//!
//! One uniquely named temp directory per request. The directory is removed
//! when the [`EphemeralWorkspace`] is closed or dropped, on every path out of
//! the pipeline.

use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::output::WorkspaceFile;
use super::PreparedSource;
use crate::sandbox::CapturedStream;

const WORKSPACE_PREFIX: &str = "latex-lab-";

#[derive(Debug)]
pub struct EphemeralWorkspace {
    dir: TempDir,
}

impl EphemeralWorkspace {
    pub fn create() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(WORKSPACE_PREFIX).tempdir()?;
        debug!(path = %dir.path().display(), "Created workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `main.md`, `main.tex` and every asset
    pub fn write_source_tree(&self, source: &PreparedSource) -> io::Result<()> {
        fs::write(
            self.file_path(WorkspaceFile::Markdown),
            source.markdown.as_bytes(),
        )?;
        fs::write(self.file_path(WorkspaceFile::Source), source.latex.as_bytes())?;

        for (path, data) in &source.assets {
            let target = path.join_onto(self.path());
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, data)?;
        }
        Ok(())
    }

    fn file_path(&self, file: WorkspaceFile) -> PathBuf {
        self.path().join(file.file_name())
    }

    /// Read a well-known file, `None` if the engine did not produce it
    pub fn read(&self, file: WorkspaceFile) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.file_path(file)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read at most `cap` bytes of a file the engine wrote.
    ///
    /// The engine controls these files, so their size is untrusted.
    pub fn read_capped(
        &self,
        file: WorkspaceFile,
        cap: usize,
    ) -> io::Result<Option<CapturedStream>> {
        let handle = match File::open(self.file_path(file)) {
            Ok(handle) => handle,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut data = Vec::new();
        handle.take(cap as u64 + 1).read_to_end(&mut data)?;
        let truncated = data.len() > cap;
        data.truncate(cap);
        Ok(Some(CapturedStream { data, truncated }))
    }

    /// Zip the whole workspace tree, paths relative to the root.
    ///
    /// Each entry holds at most `entry_cap` bytes of its file.
    pub fn bundle(&self, entry_cap: u64) -> io::Result<Vec<u8>> {
        let mut files = Vec::new();
        collect_files(self.path(), &mut files)?;
        files.sort();

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for file in files {
            let Ok(relative) = file.strip_prefix(self.path()) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            writer.start_file(name, options).map_err(io::Error::other)?;
            let copied = io::copy(&mut File::open(&file)?.take(entry_cap), &mut writer)?;
            if copied == entry_cap {
                debug!(path = %file.display(), "Bundle entry cut at {} bytes", entry_cap);
            }
        }

        let cursor = writer.finish().map_err(io::Error::other)?;
        Ok(cursor.into_inner())
    }

    /// Delete the workspace, logging (not propagating) failures
    pub fn close(self) {
        let path = self.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!(path = %path.display(), "Removed workspace"),
            Err(e) => warn!(path = %path.display(), "Failed to remove workspace: {}", e),
        }
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), files)?;
        } else if file_type.is_file() {
            files.push(entry.path());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{AssetMap, SafeRelativePath};
    use pretty_assertions::assert_eq;
    use zip::ZipArchive;

    fn source() -> PreparedSource {
        let mut assets = AssetMap::new();
        assets.insert(
            SafeRelativePath::parse("images/fig1.png").unwrap(),
            vec![1, 2, 3],
        );
        PreparedSource {
            markdown: "# Hi".to_string(),
            latex: r"\documentclass{article}".to_string(),
            assets,
            notices: Vec::new(),
        }
    }

    #[test]
    fn test_write_and_read_back() {
        let workspace = EphemeralWorkspace::create().unwrap();
        workspace.write_source_tree(&source()).unwrap();

        assert_eq!(
            workspace.read(WorkspaceFile::Source).unwrap().unwrap(),
            br"\documentclass{article}".to_vec()
        );
        assert!(workspace.path().join("images/fig1.png").is_file());
        assert!(workspace.read(WorkspaceFile::Pdf).unwrap().is_none());
        assert!(workspace
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(WORKSPACE_PREFIX));
    }

    #[test]
    fn test_bundle_lists_tree() {
        let workspace = EphemeralWorkspace::create().unwrap();
        workspace.write_source_tree(&source()).unwrap();

        let bundle = workspace.bundle(1 << 20).unwrap();
        let archive = ZipArchive::new(Cursor::new(bundle)).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort();
        assert_eq!(names, vec!["images/fig1.png", "main.md", "main.tex"]);
    }

    #[test]
    fn test_bundle_entries_are_capped() {
        let workspace = EphemeralWorkspace::create().unwrap();
        fs::write(workspace.path().join("main.log"), vec![b'x'; 4096]).unwrap();

        let bundle = workspace.bundle(100).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bundle)).unwrap();
        let mut entry = archive.by_name("main.log").unwrap();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        assert_eq!(data.len(), 100);
    }

    #[test]
    fn test_read_capped() {
        let workspace = EphemeralWorkspace::create().unwrap();
        assert!(workspace.read_capped(WorkspaceFile::Log, 8).unwrap().is_none());

        fs::write(workspace.path().join("main.log"), "0123456789").unwrap();
        let cut = workspace.read_capped(WorkspaceFile::Log, 8).unwrap().unwrap();
        assert_eq!(cut.data, b"01234567".to_vec());
        assert!(cut.truncated);

        let whole = workspace.read_capped(WorkspaceFile::Log, 10).unwrap().unwrap();
        assert_eq!(whole.data, b"0123456789".to_vec());
        assert!(!whole.truncated);
    }

    #[test]
    fn test_close_removes_directory() {
        let workspace = EphemeralWorkspace::create().unwrap();
        workspace.write_source_tree(&source()).unwrap();
        let path = workspace.path().to_path_buf();
        workspace.close();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let path = {
            let workspace = EphemeralWorkspace::create().unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
