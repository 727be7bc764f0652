//! Safe relative paths for workspace assets
//!
//! Every asset written into a compilation workspace is addressed by a
//! [`SafeRelativePath`]. The only way to obtain one is [`SafeRelativePath::parse`],
//! which removes traversal components and restricts each component to a
//! conservative character set, so a value of this type can always be joined
//! onto a workspace root without escaping it.

use std::path::{Path, PathBuf};

/// Extensions allowed into the asset map (raster images and PDF figures)
pub const ALLOWED_ASSET_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "pdf"];

/// A sanitized, non-empty, relative `/`-separated path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SafeRelativePath(String);

impl SafeRelativePath {
    /// Sanitize an untrusted path.
    ///
    /// Backslashes are treated as separators; empty, `.` and `..` components
    /// are removed; characters outside `[A-Za-z0-9._-]` become `_`. Returns
    /// `None` when nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.replace('\\', "/");

        let components: Vec<String> = normalized
            .split('/')
            .filter(|c| !c.is_empty() && *c != "." && *c != "..")
            .map(sanitize_component)
            .filter(|c| !c.chars().all(|ch| ch == '.'))
            .collect();

        if components.is_empty() {
            return None;
        }

        Some(Self(components.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase extension, if any
    pub fn extension(&self) -> Option<String> {
        let name = self.0.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Whether this path names an allowed figure asset
    pub fn is_allowed_asset(&self) -> bool {
        self.extension()
            .map(|ext| ALLOWED_ASSET_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Resolve under a root directory
    pub fn join_onto(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, c| acc.join(c))
    }
}

impl std::fmt::Display for SafeRelativePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SafeRelativePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn sanitize_component(component: &str) -> String {
    component
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
