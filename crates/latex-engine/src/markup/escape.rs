//! LaTeX escaping and inline formatting

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LINK: Regex = Regex::new(r"\[[^\]]+\]\([^)]+\)").unwrap();
    static ref AUTOLINK: Regex =
        Regex::new(r"https?://[^\s)]+|[\w.+-]+@[\w.-]+\.[A-Za-z]{2,}").unwrap();
    static ref BOLD: Regex = Regex::new(r"\*\*([^*]+)\*\*").unwrap();
    static ref ITALIC: Regex = Regex::new(r"\*([^*]+)\*").unwrap();
    static ref CODE: Regex = Regex::new(r"`([^`]+)`").unwrap();
    static ref HREF: Regex = Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap();
}

/// Escape every LaTeX special character in user text
pub fn escape_latex(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str(r"\textbackslash{}"),
            '{' => out.push_str(r"\{"),
            '}' => out.push_str(r"\}"),
            '$' => out.push_str(r"\$"),
            '&' => out.push_str(r"\&"),
            '#' => out.push_str(r"\#"),
            '%' => out.push_str(r"\%"),
            '_' => out.push_str(r"\_"),
            '~' => out.push_str(r"\textasciitilde{}"),
            '^' => out.push_str(r"\textasciicircum{}"),
            other => out.push(other),
        }
    }
    out
}

/// Escape a line of Markdown and translate its inline markup.
///
/// Escaping runs over the whole text first; the emphasis, code and link
/// substitutions only ever see escaped text, so they cannot be fed raw
/// LaTeX and their own output is never escaped again.
pub fn format_inline(text: &str) -> String {
    let linked = autolink(text);
    let escaped = escape_latex(&linked);

    let out = BOLD.replace_all(&escaped, r"\textbf{$1}");
    let out = ITALIC.replace_all(&out, r"\textit{$1}");
    let out = CODE.replace_all(&out, r"\texttt{$1}");
    let out = HREF.replace_all(&out, r"\href{$2}{$1}");
    out.into_owned()
}

/// Turn bare URLs and email addresses into Markdown links, leaving
/// existing `[text](url)` links alone
fn autolink(text: &str) -> String {
    let links: Vec<(usize, usize)> = LINK.find_iter(text).map(|m| (m.start(), m.end())).collect();
    let inside_link = |index: usize| links.iter().any(|&(start, end)| index >= start && index < end);

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in AUTOLINK.find_iter(text) {
        if inside_link(m.start()) {
            continue;
        }
        out.push_str(&text[last..m.start()]);
        let raw = m.as_str();
        if raw.contains('@') && !raw.starts_with("http") {
            out.push_str(&format!("[{}](mailto:{})", raw, raw));
        } else {
            out.push_str(&format!("[{}]({})", raw, raw));
        }
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}
