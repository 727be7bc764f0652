//! Bounded zip reading shared by bundle and docx inputs

use std::io::{Cursor, Read};

use zip::ZipArchive;

use crate::compiler::errors::{LabError, Rejection};

/// Canonical document name inside a bundle
pub const ROOT_DOCUMENT: &str = "main.md";

/// Directories in a bundle whose files are treated as assets
pub const ASSET_PREFIXES: &[&str] = &["images/", "assets/"];

/// A zip archive read with a budget on total decompressed bytes
pub struct BoundedArchive<'a> {
    archive: ZipArchive<Cursor<&'a [u8]>>,
    remaining: u64,
    limit: u64,
}

/// One file entry read out of an archive
pub struct ArchiveEntry {
    /// Entry name with `\` normalized to `/`
    pub name: String,
    pub data: Vec<u8>,
}

impl<'a> BoundedArchive<'a> {
    pub fn open(bytes: &'a [u8], max_extracted_bytes: u64) -> Result<Self, LabError> {
        let archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| LabError::conversion(format!("Invalid zip archive: {}", e)))?;
        Ok(Self {
            archive,
            remaining: max_extracted_bytes,
            limit: max_extracted_bytes,
        })
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    /// Read the entry at `index`, charging its size against the budget.
    ///
    /// Returns `Ok(None)` for directory entries.
    pub fn read_index(&mut self, index: usize) -> Result<Option<ArchiveEntry>, LabError> {
        let mut file = self
            .archive
            .by_index(index)
            .map_err(|e| LabError::conversion(format!("Unreadable zip entry #{}: {}", index, e)))?;

        if file.is_dir() {
            return Ok(None);
        }

        let name = file.name().replace('\\', "/");
        let data = read_limited(&mut file, &mut self.remaining, self.limit, &name)?;
        Ok(Some(ArchiveEntry { name, data }))
    }

    /// Read a named entry, if present
    pub fn read_named(&mut self, name: &str) -> Result<Option<Vec<u8>>, LabError> {
        let mut file = match self.archive.by_name(name) {
            Ok(file) => file,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(LabError::conversion(format!(
                    "Unreadable zip entry {}: {}",
                    name, e
                )))
            }
        };

        let data = read_limited(&mut file, &mut self.remaining, self.limit, name)?;
        Ok(Some(data))
    }
}

fn read_limited<R: Read>(
    reader: &mut R,
    remaining: &mut u64,
    limit: u64,
    name: &str,
) -> Result<Vec<u8>, LabError> {
    let mut data = Vec::new();
    // One extra byte distinguishes "exactly at budget" from "over budget"
    reader
        .take(remaining.saturating_add(1))
        .read_to_end(&mut data)
        .map_err(|e| LabError::conversion(format!("Failed to extract {}: {}", name, e)))?;

    let read = data.len() as u64;
    if read > *remaining {
        return Err(LabError::InputRejected(Rejection::ArchiveTooLarge { limit }));
    }
    *remaining -= read;
    Ok(data)
}

/// Result of unpacking a bundle upload
#[derive(Debug, Default)]
pub struct BundleContents {
    pub markdown: String,
    /// Raw `(path, bytes)` pairs, not yet sanitized
    pub assets: Vec<(String, Vec<u8>)>,
    /// Entries that were neither the root document nor an asset
    pub ignored: Vec<String>,
}

/// Unpack a zip bundle: a root `main.md` plus files under `images/` or `assets/`.
///
/// Asset entries are rewritten under `images/`.
pub fn read_bundle(bytes: &[u8], max_extracted_bytes: u64) -> Result<BundleContents, LabError> {
    let mut archive = BoundedArchive::open(bytes, max_extracted_bytes)?;
    let mut contents = BundleContents::default();
    let mut root: Option<Vec<u8>> = None;

    for index in 0..archive.len() {
        let Some(entry) = archive.read_index(index)? else {
            continue;
        };

        if entry.name.eq_ignore_ascii_case(ROOT_DOCUMENT) {
            root = Some(entry.data);
            continue;
        }

        match asset_relative_name(&entry.name) {
            Some(rest) => contents.assets.push((format!("images/{}", rest), entry.data)),
            None => contents.ignored.push(entry.name),
        }
    }

    let root = root.ok_or(LabError::InputRejected(Rejection::MissingRootDocument))?;
    contents.markdown = String::from_utf8_lossy(&root).into_owned();
    Ok(contents)
}

fn asset_relative_name(name: &str) -> Option<&str> {
    ASSET_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .filter(|rest| !rest.is_empty())
}


#[cfg(test)]
mod tests {
    use super::test_support::build_zip;
    use super::*;
    use pretty_assertions::assert_eq;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47];

    #[test]
    fn test_bundle_with_images() {
        let zip = build_zip(&[
            ("main.md", b"# Title\n\n![cap](images/fig1.png)\n"),
            ("images/", b""),
            ("images/fig1.png", PNG),
            ("assets/logo.jpg", PNG),
            ("notes.txt", b"ignore me"),
        ]);

        let bundle = read_bundle(&zip, 1 << 20).unwrap();
        assert!(bundle.markdown.starts_with("# Title"));
        let names: Vec<&str> = bundle.assets.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["images/fig1.png", "images/logo.jpg"]);
        assert_eq!(bundle.ignored, vec!["notes.txt".to_string()]);
    }

    #[test]
    fn test_root_document_is_case_insensitive() {
        let zip = build_zip(&[("MAIN.MD", b"hello")]);
        let bundle = read_bundle(&zip, 1 << 20).unwrap();
        assert_eq!(bundle.markdown, "hello");
    }

    #[test]
    fn test_nested_main_md_is_not_root() {
        let zip = build_zip(&[("paper/main.md", b"hello")]);
        let err = read_bundle(&zip, 1 << 20).unwrap_err();
        assert!(matches!(
            err,
            LabError::InputRejected(Rejection::MissingRootDocument)
        ));
    }

    #[test]
    fn test_corrupt_zip_is_conversion_error() {
        let err = read_bundle(b"PK\x03\x04 definitely not a zip", 1 << 20).unwrap_err();
        assert!(matches!(err, LabError::Conversion { .. }));
    }

    #[test]
    fn test_extraction_budget() {
        let big = vec![b'a'; 4096];
        let zip = build_zip(&[("main.md", b"x"), ("images/a.png", &big)]);

        let err = read_bundle(&zip, 1024).unwrap_err();
        assert!(matches!(
            err,
            LabError::InputRejected(Rejection::ArchiveTooLarge { .. })
        ));

        // Exactly at budget is fine
        assert!(read_bundle(&zip, 4097).is_ok());
    }

    #[test]
    fn test_read_named_missing_entry() {
        let zip = build_zip(&[("a.txt", b"a")]);
        let mut archive = BoundedArchive::open(&zip, 1 << 20).unwrap();
        assert!(archive.read_named("b.txt").unwrap().is_none());
        assert_eq!(archive.read_named("a.txt").unwrap().unwrap(), b"a".to_vec());
    }
}
