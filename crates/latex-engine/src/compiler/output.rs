//! Well-known files in a compilation workspace

/// Files the pipeline writes into, or reads back from, a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceFile {
    /// The canonical Markdown the source was generated from
    Markdown,
    /// Generated LaTeX source handed to the engine
    Source,
    /// Compiled artifact
    Pdf,
    /// Engine log
    Log,
}

impl WorkspaceFile {
    /// File name relative to the workspace root
    pub fn file_name(&self) -> &'static str {
        match self {
            WorkspaceFile::Markdown => "main.md",
            WorkspaceFile::Source => "main.tex",
            WorkspaceFile::Pdf => "main.pdf",
            WorkspaceFile::Log => "main.log",
        }
    }
}

impl std::fmt::Display for WorkspaceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}
