//! Pipe tables to booktabs `tabular`

use lazy_static::lazy_static;
use regex::Regex;

use super::escape::format_inline;

lazy_static! {
    static ref TABLE_LINE: Regex = Regex::new(r"^\|(.+)\|$").unwrap();
    static ref SEPARATOR_ROW: Regex = Regex::new(r"^\|[\s:|-]*-[\s:|-]*\|$").unwrap();
}

pub fn is_table_line(line: &str) -> bool {
    TABLE_LINE.is_match(line.trim())
}

/// `| --- | :-: |` style header separator
pub fn is_separator_row(line: &str) -> bool {
    SEPARATOR_ROW.is_match(line.trim())
}

/// Collect consecutive table lines starting at `start`.
///
/// Returns the cell rows (separator rows dropped) and the index of the first
/// line after the table.
pub fn parse_table(lines: &[&str], start: usize) -> (Vec<Vec<String>>, usize) {
    let mut rows = Vec::new();
    let mut index = start;

    while index < lines.len() && is_table_line(lines[index]) {
        let line = lines[index].trim();
        if !is_separator_row(line) {
            let inner = &line[1..line.len() - 1];
            rows.push(inner.split('|').map(|cell| cell.trim().to_string()).collect());
        }
        index += 1;
    }

    (rows, index)
}

/// Render rows as a centered tabular; the first row is the bold header.
///
/// The column count is the widest row, shorter rows are padded.
pub fn render_table(rows: &[Vec<String>]) -> String {
    let Some(columns) = rows.iter().map(Vec::len).max() else {
        return String::new();
    };

    let render_row = |row: &Vec<String>, header: bool| -> String {
        let cells: Vec<String> = (0..columns)
            .map(|c| {
                let cell = row.get(c).map(String::as_str).unwrap_or("");
                match (header, cell.is_empty()) {
                    (_, true) => String::new(),
                    (true, false) => format!(r"\textbf{{{}}}", format_inline(cell)),
                    (false, false) => format_inline(cell),
                }
            })
            .collect();
        format!(r"{} \\", cells.join(" & "))
    };

    let mut lines = vec![
        r"\begin{center}".to_string(),
        format!(r"\begin{{tabular}}{{{}}}", vec!["l"; columns].join(" ")),
        r"\toprule".to_string(),
        render_row(&rows[0], true),
        r"\midrule".to_string(),
    ];
    lines.extend(rows[1..].iter().map(|row| render_row(row, false)));
    lines.push(r"\bottomrule".to_string());
    lines.push(r"\end{tabular}".to_string());
    lines.push(r"\end{center}".to_string());
    lines.join("\n")
}
