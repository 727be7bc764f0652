//! Input resolution: upload bytes to a canonical Markdown document
//!
//! The resolver is the only stage that looks at raw upload bytes. It
//! enforces the upload ceiling before any parsing, detects the input kind from
//! the file extension and produces a [`CanonicalDocument`] whose assets have all
//! passed through [`SafeRelativePath`].

pub mod archive;
pub mod docx;
pub mod path;

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info};

pub use path::{SafeRelativePath, ALLOWED_ASSET_EXTENSIONS};

use crate::compiler::errors::{LabError, Rejection};
use crate::config::InputLimits;

lazy_static! {
    /// Data-URI image payloads embedded in the markup
    static ref DATA_URI_IMAGE: Regex = Regex::new(r"(?i)data:image/[^;]+;base64").unwrap();

    /// HTML image tags, as left behind by some converters
    static ref HTML_IMAGE: Regex =
        Regex::new(r#"(?i)<img[^>]*src=["']([^"']+)["'][^>]*>"#).unwrap();

    /// Markdown image references
    static ref MARKDOWN_IMAGE: Regex = Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").unwrap();

    static ref REMOTE_URL: Regex = Regex::new(r"(?i)^https?://").unwrap();
}

/// Sanitized figure assets keyed by workspace-relative path
pub type AssetMap = BTreeMap<SafeRelativePath, Vec<u8>>;

/// Upload formats the resolver understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Markdown,
    Docx,
    ZipBundle,
}

impl InputKind {
    /// Detect the input kind from a filename's extension
    pub fn from_filename(filename: &str) -> Result<Self, Rejection> {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "md" | "markdown" => Ok(InputKind::Markdown),
            "docx" => Ok(InputKind::Docx),
            "zip" => Ok(InputKind::ZipBundle),
            _ => Err(Rejection::UnsupportedFormat(ext)),
        }
    }
}

/// Extracted Markdown plus its assets, independent of upload format
#[derive(Debug, Clone, Default)]
pub struct CanonicalDocument {
    pub markdown: String,
    pub assets: AssetMap,
    /// Advisory notices for the log (conversion warnings, dropped files)
    pub notices: Vec<String>,
}

/// Resolve an upload into a [`CanonicalDocument`]
pub fn resolve_input(
    filename: &str,
    content: &[u8],
    limits: &InputLimits,
) -> Result<CanonicalDocument, LabError> {
    // Bound all later work on hostile input
    if content.len() > limits.max_upload_bytes {
        return Err(Rejection::TooLarge {
            limit: limits.max_upload_bytes,
        }
        .into());
    }

    let kind = InputKind::from_filename(filename)?;
    info!(?kind, bytes = content.len(), "Resolving upload");

    let mut notices = Vec::new();
    let (markdown, raw_assets) = match kind {
        InputKind::Markdown => (String::from_utf8_lossy(content).into_owned(), Vec::new()),
        InputKind::ZipBundle => {
            let bundle = archive::read_bundle(content, limits.max_extracted_bytes)?;
            for ignored in &bundle.ignored {
                notices.push(format!("[notice] Ignored bundle entry {}", ignored));
            }
            (bundle.markdown, bundle.assets)
        }
        InputKind::Docx => {
            let conversion = docx::docx_to_markdown(content, limits.max_extracted_bytes)?;
            notices.extend(conversion.warnings);
            (conversion.markdown, conversion.images)
        }
    };

    let markdown = normalize_html_images(&markdown);

    if DATA_URI_IMAGE.is_match(&markdown) {
        return Err(Rejection::InlineImages.into());
    }

    let assets = sanitize_assets(raw_assets, &mut notices);
    let markdown = normalize_image_refs(&markdown, &assets, &mut notices);
    debug!(
        assets = assets.len(),
        notices = notices.len(),
        "Canonical document ready"
    );

    Ok(CanonicalDocument {
        markdown,
        assets,
        notices,
    })
}

/// Keep only assets with a safe path and a whitelisted extension
pub fn sanitize_assets(raw: Vec<(String, Vec<u8>)>, notices: &mut Vec<String>) -> AssetMap {
    let mut assets = AssetMap::new();
    for (name, data) in raw {
        match SafeRelativePath::parse(&name) {
            Some(path) if path.is_allowed_asset() => {
                assets.insert(path, data);
            }
            _ => notices.push(format!(
                "[notice] Dropped asset {}: only .png, .jpg, .jpeg and .pdf files are embedded",
                name
            )),
        }
    }
    assets
}

/// Rewrite `<img src="...">` tags as Markdown images
pub fn normalize_html_images(markdown: &str) -> String {
    HTML_IMAGE.replace_all(markdown, "![]($1)").into_owned()
}

/// Strip `./` and leading `/` from local image sources and note figures
/// whose asset is not part of the upload
fn normalize_image_refs(markdown: &str, assets: &AssetMap, notices: &mut Vec<String>) -> String {
    MARKDOWN_IMAGE
        .replace_all(markdown, |caps: &regex::Captures| {
            let alt = &caps[1];
            let src = caps[2].trim();
            if REMOTE_URL.is_match(src) {
                return format!("![{}]({})", alt, src);
            }

            let normalized = src.trim_start_matches("./").trim_start_matches('/');
            let known = SafeRelativePath::parse(normalized)
                .map(|path| assets.contains_key(&path))
                .unwrap_or(false);
            if !known {
                notices.push(format!(
                    "[notice] Figure references {} which is not among the uploaded images",
                    normalized
                ));
            }
            format!("![{}]({})", alt, normalized)
        })
        .into_owned()
}
