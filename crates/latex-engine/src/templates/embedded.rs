//! Embedded template loader
//!
//! The manuscript template is loaded from `templates/article.tex` at compile
//! time, so the binary never reads templates from disk at runtime.

/// Article template - loaded from templates/article.tex
const ARTICLE_TEMPLATE: &str = include_str!("../../templates/article.tex");

/// Insertion points, in the order they appear in the template
pub const INSERTION_POINTS: &[&str] = &["FOOTER", "TITLE", "AUTHORS", "META", "BODY"];

/// The embedded article template
pub fn article_template() -> &'static str {
    ARTICLE_TEMPLATE
}
