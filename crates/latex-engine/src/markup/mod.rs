//! Markdown subset to LaTeX body translation
//!
//! The transformer is line-oriented. Each line is classified (fence, blank,
//! figure, table, heading, list item, quote, paragraph text) and the open block is
//! tracked by an explicit [`Cursor`] so that closing an environment always
//! happens in one place.
//!
//! All user text goes through [`format_inline`], which escapes LaTeX specials
//! before any markup is introduced. Code blocks are the single exception: they
//! are emitted inside `verbatim` as-is.

pub mod escape;
pub mod table;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use escape::{escape_latex, format_inline};

use crate::input::{AssetMap, SafeRelativePath};

lazy_static! {
    static ref IMAGE_ANYWHERE: Regex = Regex::new(r"(?s)!\[(.*?)\]\(([^)]+)\)").unwrap();
    static ref IMAGE_LINE: Regex = Regex::new(r"^!\[([^\]]*)\]\(([^)]+)\)").unwrap();
    static ref HEADING: Regex = Regex::new(r"^(#{1,3})\s+(.*)$").unwrap();
    static ref BULLET: Regex = Regex::new(r"^[-*+]\s+").unwrap();
    static ref ORDERED: Regex = Regex::new(r"^\d+\.\s+").unwrap();
    static ref QUOTE: Regex = Regex::new(r"^>\s?").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref REMOTE: Regex = Regex::new(r"(?i)^https?://").unwrap();
}

const VERBATIM_END: &str = r"\end{verbatim}";

/// Figure sizing knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkupOptions {
    /// Maximum figure height as a LaTeX length
    pub image_max_height: String,
    /// Scale figures to the line width and `image_max_height`
    pub image_fit: bool,
}

impl Default for MarkupOptions {
    fn default() -> Self {
        Self {
            image_max_height: r"0.85\textheight".to_string(),
            image_fit: true,
        }
    }
}

/// The block currently open in the output
#[derive(Debug)]
enum Cursor {
    Idle,
    Paragraph(Vec<String>),
    Itemize,
    Enumerate,
    Quote(Vec<String>),
    Code,
}

struct Emitter<'a> {
    out: Vec<String>,
    cursor: Cursor,
    options: &'a MarkupOptions,
    /// Figures outside this map become placeholders
    assets: Option<&'a AssetMap>,
}

impl<'a> Emitter<'a> {
    fn new(options: &'a MarkupOptions, assets: Option<&'a AssetMap>) -> Self {
        Self {
            out: Vec::new(),
            cursor: Cursor::Idle,
            options,
            assets,
        }
    }

    fn push(&mut self, line: impl Into<String>) {
        self.out.push(line.into());
    }

    /// Close whatever block is open
    fn close(&mut self) {
        match std::mem::replace(&mut self.cursor, Cursor::Idle) {
            Cursor::Idle => {}
            Cursor::Paragraph(lines) => {
                let rendered = render_paragraph(&lines);
                self.push(rendered);
            }
            Cursor::Itemize => self.push(r"\end{itemize}"),
            Cursor::Enumerate => self.push(r"\end{enumerate}"),
            Cursor::Quote(lines) => {
                self.push(r"\begin{quote}");
                self.push(format_inline(&lines.join(" ")));
                self.push(r"\end{quote}");
            }
            Cursor::Code => self.push(VERBATIM_END),
        }
    }

    fn toggle_code(&mut self) {
        if matches!(self.cursor, Cursor::Code) {
            self.close();
        } else {
            self.close();
            self.push(r"\begin{verbatim}");
            self.cursor = Cursor::Code;
        }
    }

    fn code_line(&mut self, line: &str) {
        // A literal end marker would terminate the environment early
        self.push(line.replace(VERBATIM_END, r"\end {verbatim}"));
    }

    fn list_item(&mut self, ordered: bool, text: &str) {
        let same = match self.cursor {
            Cursor::Itemize => !ordered,
            Cursor::Enumerate => ordered,
            _ => false,
        };
        if !same {
            self.close();
            if ordered {
                self.push(r"\begin{enumerate}");
                self.cursor = Cursor::Enumerate;
            } else {
                self.push(r"\begin{itemize}");
                self.cursor = Cursor::Itemize;
            }
        }
        self.push(format!(r"\item {}", format_inline(text)));
    }

    fn paragraph_line(&mut self, text: &str) {
        match &mut self.cursor {
            Cursor::Paragraph(lines) => lines.push(text.to_string()),
            _ => {
                self.close();
                self.cursor = Cursor::Paragraph(vec![text.to_string()]);
            }
        }
    }

    fn quote_line(&mut self, text: &str) {
        match &mut self.cursor {
            Cursor::Quote(lines) => lines.push(text.to_string()),
            _ => {
                self.close();
                self.cursor = Cursor::Quote(vec![text.to_string()]);
            }
        }
    }

    fn figure(&mut self, alt: &str, src: &str) {
        self.close();

        if REMOTE.is_match(src) {
            let text = if alt.is_empty() { src } else { alt };
            self.push(format_inline(&format!("[{}]({})", text, src)));
            return;
        }

        let Some(path) = SafeRelativePath::parse(src) else {
            if !alt.is_empty() {
                self.push(format_inline(alt));
            }
            return;
        };

        let missing = self
            .assets
            .is_some_and(|assets| !assets.contains_key(&path));
        let include = if missing {
            format!(r"\fbox{{Missing figure: {}}}", escape_latex(path.as_str()))
        } else if self.options.image_fit {
            format!(
                r"\includegraphics[width=\linewidth,height={},keepaspectratio]{{{}}}",
                self.options.image_max_height, path
            )
        } else {
            format!(r"\includegraphics{{{}}}", path)
        };

        self.push(r"\begin{figure}[htbp]");
        self.push(r"\centering");
        self.push(include);
        if !alt.is_empty() {
            self.push(format!(r"\caption{{{}}}", format_inline(alt)));
        }
        self.push(r"\end{figure}");
    }

    fn finish(mut self) -> String {
        self.close();
        self.out.join("\n")
    }
}

/// Translate Markdown into a LaTeX body fragment
pub fn markdown_to_latex(markdown: &str, options: &MarkupOptions) -> String {
    render(markdown, options, None)
}

/// Like [`markdown_to_latex`], but a local figure whose file is not in
/// `assets` is drawn as a boxed placeholder instead of an `\includegraphics`
/// the engine would fail on
pub fn markdown_to_latex_with_assets(
    markdown: &str,
    options: &MarkupOptions,
    assets: &AssetMap,
) -> String {
    render(markdown, options, Some(assets))
}

fn render(markdown: &str, options: &MarkupOptions, assets: Option<&AssetMap>) -> String {
    let normalized = collapse_image_alt(markdown);
    let lines: Vec<&str> = normalized.lines().collect();
    let mut emitter = Emitter::new(options, assets);

    let mut index = 0;
    while index < lines.len() {
        let line = lines[index];
        let trimmed = line.trim();
        index += 1;

        if trimmed.starts_with("```") {
            emitter.toggle_code();
            continue;
        }

        if matches!(emitter.cursor, Cursor::Code) {
            emitter.code_line(line);
            continue;
        }

        if trimmed.is_empty() {
            emitter.close();
            emitter.push("");
            continue;
        }

        if let Some(caps) = IMAGE_LINE.captures(trimmed) {
            emitter.figure(caps[1].trim(), caps[2].trim());
            continue;
        }

        if table::is_table_line(trimmed)
            && lines.get(index).is_some_and(|next| table::is_separator_row(next))
        {
            emitter.close();
            let (rows, next) = table::parse_table(&lines, index - 1);
            emitter.push(table::render_table(&rows));
            index = next;
            continue;
        }

        if let Some(caps) = HEADING.captures(trimmed) {
            emitter.close();
            let command = match caps[1].len() {
                1 => "section",
                2 => "subsection",
                _ => "subsubsection",
            };
            emitter.push(format!(r"\{}{{{}}}", command, format_inline(caps[2].trim())));
            continue;
        }

        if let Some(m) = BULLET.find(trimmed) {
            emitter.list_item(false, &trimmed[m.end()..]);
            continue;
        }

        if let Some(m) = ORDERED.find(trimmed) {
            emitter.list_item(true, &trimmed[m.end()..]);
            continue;
        }

        if let Some(m) = QUOTE.find(trimmed) {
            emitter.quote_line(trimmed[m.end()..].trim());
            continue;
        }

        emitter.paragraph_line(trimmed);
    }

    emitter.finish()
}

/// Collapse whitespace (including newlines) inside image alt text so that
/// every image sits on one line
fn collapse_image_alt(markdown: &str) -> String {
    IMAGE_ANYWHERE
        .replace_all(markdown, |caps: &regex::Captures| {
            let alt = WHITESPACE.replace_all(caps[1].trim(), " ");
            format!("![{}]({})", alt, &caps[2])
        })
        .into_owned()
}

/// Short consecutive lines without closing punctuation (or with contact
/// details) read as an author/affiliation block and keep their line breaks
fn is_author_block(lines: &[String]) -> bool {
    if !(2..=12).contains(&lines.len()) {
        return false;
    }

    let joined = lines.join(" ");
    if joined.contains('@') || joined.to_ascii_lowercase().contains("orcid.org") {
        return true;
    }

    let short = lines.iter().all(|line| line.chars().count() <= 80);
    let open_ended = lines
        .last()
        .map(|line| !line.trim_end().ends_with(['.', '!', '?']))
        .unwrap_or(false);
    short && open_ended
}

fn render_paragraph(lines: &[String]) -> String {
    if is_author_block(lines) {
        lines
            .iter()
            .map(|line| format_inline(line))
            .collect::<Vec<_>>()
            .join(" \\\\\n")
    } else {
        format_inline(&lines.join(" "))
    }
}
