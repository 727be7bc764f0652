//! Document assembly: LaTeX body + metadata into a complete `main.tex`

pub mod embedded;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::compiler::DocumentMeta;
use crate::markup::escape_latex;

pub use embedded::article_template;

lazy_static! {
    static ref INSERTION_POINT: Regex =
        Regex::new(r"@@(TITLE|AUTHORS|META|FOOTER|BODY)@@").unwrap();
}

/// Fill the article template.
///
/// Substitution is a single pass over the template, so a marker that happens
/// to occur inside the body or metadata is left untouched.
pub fn build_latex_document(body: &str, meta: &DocumentMeta) -> String {
    let title = escape_latex(meta.title.trim());
    let authors = escape_latex(meta.authors.trim());
    let meta_line = metadata_line(meta);
    let footer = footer_text(meta);

    INSERTION_POINT
        .replace_all(article_template(), |caps: &Captures| match &caps[1] {
            "TITLE" => title.clone(),
            "AUTHORS" => authors.clone(),
            "META" => meta_line.clone(),
            "FOOTER" => footer.clone(),
            _ => body.to_string(),
        })
        .into_owned()
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// `DOI: … \quad Received: …` for the fields that are present
fn metadata_line(meta: &DocumentMeta) -> String {
    [
        ("DOI", &meta.identifier),
        ("Received", &meta.received_date),
        ("Accepted", &meta.accepted_date),
        ("Published", &meta.published_date),
    ]
    .into_iter()
    .filter_map(|(label, value)| present(value).map(|v| format!("{}: {}", label, escape_latex(v))))
    .collect::<Vec<_>>()
    .join(r" \quad ")
}

fn footer_text(meta: &DocumentMeta) -> String {
    match present(&meta.identifier) {
        Some(doi) => format!("DOI: {}", escape_latex(doi)),
        None => escape_latex(meta.title.trim()),
    }
}
