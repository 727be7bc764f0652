//! Word (.docx) to Markdown conversion
//!
//! Reads `word/document.xml` and its relationships part and produces the
//! Markdown dialect understood by [`crate::markup`]: `#` headings, `- ` list
//! items, `**bold**`/`*italic*` runs, `[text](url)` hyperlinks, pipe tables and
//! one `![](images/docx-N.ext)` line per embedded picture. Pictures are pulled
//! out of the package into byte buffers named in document order.
//!
//! Anything the converter cannot represent is reported as a warning rather
//! than failing the upload.

use std::collections::{BTreeSet, HashMap};

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::archive::BoundedArchive;
use crate::compiler::errors::LabError;

const DOCUMENT_PART: &str = "word/document.xml";
const RELATIONSHIPS_PART: &str = "word/_rels/document.xml.rels";

/// Paragraph styles that carry no structure and need no warning
const PLAIN_STYLES: &[&str] = &["normal", "listparagraph", "bodytext", "nospacing"];

/// Output of a docx conversion
#[derive(Debug, Default)]
pub struct DocxConversion {
    pub markdown: String,
    /// `(images/docx-N.ext, bytes)` in document order
    pub images: Vec<(String, Vec<u8>)>,
    /// Advisory messages, formatted `[warning] ...`
    pub warnings: Vec<String>,
}

/// Convert a docx package to Markdown
pub fn docx_to_markdown(bytes: &[u8], max_extracted_bytes: u64) -> Result<DocxConversion, LabError> {
    let mut archive = BoundedArchive::open(bytes, max_extracted_bytes)?;

    let document = archive
        .read_named(DOCUMENT_PART)?
        .ok_or_else(|| LabError::conversion("Not a Word document: word/document.xml is missing"))?;
    let document = String::from_utf8(document)
        .map_err(|e| LabError::conversion(format!("{} is not valid UTF-8: {}", DOCUMENT_PART, e)))?;

    let relationships = match archive.read_named(RELATIONSHIPS_PART)? {
        Some(xml) => parse_relationships(&String::from_utf8_lossy(&xml))?,
        None => HashMap::new(),
    };

    let mut walker = DocumentWalker::new(&mut archive, &relationships);
    walker.walk(&document)?;
    Ok(walker.finish())
}

#[derive(Debug, Clone)]
struct Relationship {
    target: String,
    external: bool,
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, Relationship>, LabError> {
    let mut reader = Reader::from_str(xml);
    let mut relationships = HashMap::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let id = attribute(&e, b"Id")?;
                let target = attribute(&e, b"Target")?;
                let external = attribute(&e, b"TargetMode")?
                    .map(|mode| mode.eq_ignore_ascii_case("external"))
                    .unwrap_or(false);
                if let (Some(id), Some(target)) = (id, target) {
                    relationships.insert(id, Relationship { target, external });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(RELATIONSHIPS_PART, e)),
            _ => {}
        }
    }

    Ok(relationships)
}

#[derive(Debug, Default)]
struct Paragraph {
    style: Option<String>,
    list: bool,
    text: String,
    images: Vec<String>,
    /// Tables open when the paragraph started
    table_depth: usize,
}

#[derive(Debug, Default)]
struct Run {
    text: String,
    bold: bool,
    italic: bool,
}

impl Run {
    /// Markdown for this run, with emphasis markers hugging the text
    fn render(self) -> String {
        let marker = match (self.bold, self.italic) {
            (true, true) => "***",
            (true, false) => "**",
            (false, true) => "*",
            (false, false) => return self.text,
        };

        let core = self.text.trim();
        if core.is_empty() {
            return self.text;
        }
        let leading = &self.text[..self.text.len() - self.text.trim_start().len()];
        let trailing = &self.text[self.text.trim_end().len()..];
        format!("{leading}{marker}{core}{marker}{trailing}")
    }
}

#[derive(Debug)]
struct Hyperlink {
    url: Option<String>,
    text: String,
}

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: Vec<String>,
    images: Vec<String>,
}

enum Block {
    Line(String),
    ListItem(String),
}

struct DocumentWalker<'a, 'z> {
    archive: &'a mut BoundedArchive<'z>,
    relationships: &'a HashMap<String, Relationship>,
    blocks: Vec<Block>,
    /// Text boxes nest paragraphs inside runs of an outer paragraph
    paragraphs: Vec<Paragraph>,
    runs: Vec<Run>,
    hyperlink: Option<Hyperlink>,
    tables: Vec<Table>,
    in_text: bool,
    in_run_props: bool,
    images: Vec<(String, Vec<u8>)>,
    warnings: Vec<String>,
    unknown_styles: BTreeSet<String>,
}

impl<'a, 'z> DocumentWalker<'a, 'z> {
    fn new(
        archive: &'a mut BoundedArchive<'z>,
        relationships: &'a HashMap<String, Relationship>,
    ) -> Self {
        Self {
            archive,
            relationships,
            blocks: Vec::new(),
            paragraphs: Vec::new(),
            runs: Vec::new(),
            hyperlink: None,
            tables: Vec::new(),
            in_text: false,
            in_run_props: false,
            images: Vec::new(),
            warnings: Vec::new(),
            unknown_styles: BTreeSet::new(),
        }
    }

    fn walk(&mut self, xml: &str) -> Result<(), LabError> {
        let mut reader = Reader::from_str(xml);

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => self.open(&e)?,
                Ok(Event::Empty(e)) => {
                    self.open(&e)?;
                    self.close(e.local_name().as_ref());
                }
                Ok(Event::End(e)) => self.close(e.local_name().as_ref()),
                Ok(Event::Text(t)) if self.in_text => {
                    let text = t.unescape().map_err(|e| xml_error(DOCUMENT_PART, e))?;
                    if let Some(run) = self.runs.last_mut() {
                        run.text.push_str(&text);
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(xml_error(DOCUMENT_PART, e)),
                _ => {}
            }
        }

        Ok(())
    }

    fn open(&mut self, e: &BytesStart<'_>) -> Result<(), LabError> {
        match e.local_name().as_ref() {
            b"p" => self.paragraphs.push(Paragraph {
                table_depth: self.tables.len(),
                ..Paragraph::default()
            }),
            b"pStyle" => {
                let style = attribute(e, b"val")?;
                if let (Some(paragraph), Some(style)) = (self.paragraphs.last_mut(), style) {
                    paragraph.style = Some(style);
                }
            }
            b"numPr" => {
                if let Some(paragraph) = self.paragraphs.last_mut() {
                    paragraph.list = true;
                }
            }
            b"r" => self.runs.push(Run::default()),
            b"rPr" => self.in_run_props = !self.runs.is_empty(),
            name @ (b"b" | b"i") if self.in_run_props => {
                let on = toggle_enabled(attribute(e, b"val")?.as_deref());
                if let Some(run) = self.runs.last_mut() {
                    if name == b"b" {
                        run.bold = on;
                    } else {
                        run.italic = on;
                    }
                }
            }
            b"t" => self.in_text = true,
            b"tab" | b"br" | b"cr" => {
                if let Some(run) = self.runs.last_mut() {
                    run.text.push(' ');
                }
            }
            b"hyperlink" => {
                let url = attribute(e, b"id")?.and_then(|id| {
                    self.relationships
                        .get(&id)
                        .filter(|rel| rel.external)
                        .map(|rel| rel.target.clone())
                });
                self.hyperlink = Some(Hyperlink {
                    url,
                    text: String::new(),
                });
            }
            b"blip" => {
                if let Some(id) = attribute(e, b"embed")? {
                    self.embed_image(&id)?;
                }
            }
            b"imagedata" => {
                if let Some(id) = attribute(e, b"id")? {
                    self.embed_image(&id)?;
                }
            }
            b"tbl" => self.tables.push(Table::default()),
            b"tr" => {
                if let Some(table) = self.tables.last_mut() {
                    table.row.clear();
                }
            }
            b"tc" => {
                if let Some(table) = self.tables.last_mut() {
                    table.cell.clear();
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"t" => self.in_text = false,
            b"rPr" => self.in_run_props = false,
            b"r" => {
                if let Some(run) = self.runs.pop() {
                    let rendered = run.render();
                    self.push_inline(&rendered);
                }
            }
            b"hyperlink" => {
                if let Some(link) = self.hyperlink.take() {
                    let rendered = match link.url {
                        Some(url) if !link.text.trim().is_empty() => {
                            format!("[{}]({})", link.text.trim(), url)
                        }
                        _ => link.text,
                    };
                    self.push_inline(&rendered);
                }
            }
            b"p" => {
                if let Some(paragraph) = self.paragraphs.pop() {
                    self.finish_paragraph(paragraph);
                }
            }
            b"tc" => {
                if let Some(table) = self.tables.last_mut() {
                    let cell = table.cell.join(" ");
                    table.row.push(cell.trim().to_string());
                    table.cell.clear();
                }
            }
            b"tr" => {
                if let Some(table) = self.tables.last_mut() {
                    let row = std::mem::take(&mut table.row);
                    if !row.is_empty() {
                        table.rows.push(row);
                    }
                }
            }
            b"tbl" => {
                if let Some(table) = self.tables.pop() {
                    self.finish_table(table);
                }
            }
            _ => {}
        }
    }

    fn push_inline(&mut self, text: &str) {
        if let Some(link) = self.hyperlink.as_mut() {
            link.text.push_str(text);
        } else if let Some(paragraph) = self.paragraphs.last_mut() {
            paragraph.text.push_str(text);
        }
    }

    fn embed_image(&mut self, id: &str) -> Result<(), LabError> {
        let Some(rel) = self.relationships.get(id) else {
            self.warnings
                .push(format!("[warning] Image relationship {} not found", id));
            return Ok(());
        };

        if rel.external {
            self.warnings.push(format!(
                "[warning] Linked image {} is not embedded and was skipped",
                rel.target
            ));
            return Ok(());
        }

        let part = resolve_part(&rel.target);
        let Some(data) = self.archive.read_named(&part)? else {
            self.warnings
                .push(format!("[warning] Image {} is missing from the document", part));
            return Ok(());
        };

        let name = format!(
            "images/docx-{}.{}",
            self.images.len() + 1,
            image_extension(&part)
        );
        self.images.push((name.clone(), data));

        if let Some(paragraph) = self.paragraphs.last_mut() {
            paragraph.images.push(name);
        } else if let Some(table) = self.tables.last_mut() {
            table.images.push(name);
        } else {
            self.blocks.push(Block::Line(format!("![]({})", name)));
        }
        Ok(())
    }

    fn finish_paragraph(&mut self, paragraph: Paragraph) {
        let text = paragraph.text.trim().to_string();

        // Text box content is folded into the paragraph that anchors it
        if let Some(parent) = self.paragraphs.last_mut() {
            if parent.table_depth == self.tables.len() {
                if !text.is_empty() {
                    if !parent.text.is_empty() && !parent.text.ends_with(' ') {
                        parent.text.push(' ');
                    }
                    parent.text.push_str(&text);
                    parent.text.push(' ');
                }
                parent.images.extend(paragraph.images);
                return;
            }
        }

        if let Some(table) = self.tables.last_mut() {
            if !text.is_empty() {
                table.cell.push(text);
            }
            table.images.extend(paragraph.images);
            return;
        }

        let level = paragraph.style.as_deref().and_then(heading_level);
        if let Some(style) = paragraph.style.as_deref() {
            if level.is_none() && !PLAIN_STYLES.contains(&style.to_ascii_lowercase().as_str()) {
                self.unknown_styles.insert(style.to_string());
            }
        }

        if !text.is_empty() {
            let block = match level {
                Some(level) => Block::Line(format!("{} {}", "#".repeat(level), text)),
                None if paragraph.list => Block::ListItem(format!("- {}", text)),
                None => Block::Line(text),
            };
            self.blocks.push(block);
        }

        for image in paragraph.images {
            self.blocks.push(Block::Line(format!("![]({})", image)));
        }
    }

    fn finish_table(&mut self, table: Table) {
        // Nested tables are flattened into the enclosing cell
        if let Some(parent) = self.tables.last_mut() {
            let text = table
                .rows
                .iter()
                .flatten()
                .filter(|cell| !cell.is_empty())
                .cloned()
                .collect::<Vec<_>>()
                .join(" ");
            if !text.is_empty() {
                parent.cell.push(text);
            }
            parent.images.extend(table.images);
            return;
        }

        if let Some(rendered) = render_pipe_table(&table.rows) {
            self.blocks.push(Block::Line(rendered));
        }
        for image in table.images {
            self.blocks.push(Block::Line(format!("![]({})", image)));
        }
    }

    fn finish(mut self) -> DocxConversion {
        for style in &self.unknown_styles {
            self.warnings
                .push(format!("[warning] Unrecognised paragraph style: {}", style));
        }

        let mut markdown = String::new();
        let mut previous_list = false;
        for block in self.blocks {
            let (text, is_list) = match block {
                Block::Line(text) => (text, false),
                Block::ListItem(text) => (text, true),
            };
            if !markdown.is_empty() {
                markdown.push_str(if previous_list && is_list { "\n" } else { "\n\n" });
            }
            markdown.push_str(&text);
            previous_list = is_list;
        }
        if !markdown.is_empty() {
            markdown.push('\n');
        }

        DocxConversion {
            markdown,
            images: self.images,
            warnings: self.warnings,
        }
    }
}

fn render_pipe_table(rows: &[Vec<String>]) -> Option<String> {
    let columns = rows.iter().map(Vec::len).max().filter(|&n| n > 0)?;

    let mut lines = Vec::with_capacity(rows.len() + 1);
    for (index, row) in rows.iter().enumerate() {
        let cells: Vec<String> = (0..columns)
            .map(|c| row.get(c).map(|cell| cell.replace('|', "/")).unwrap_or_default())
            .collect();
        lines.push(format!("| {} |", cells.join(" | ")));
        if index == 0 {
            lines.push(format!("| {} |", vec!["---"; columns].join(" | ")));
        }
    }
    Some(lines.join("\n"))
}

fn heading_level(style: &str) -> Option<usize> {
    let normalized = style.to_ascii_lowercase().replace(' ', "");
    if normalized == "title" {
        return Some(1);
    }
    normalized
        .strip_prefix("heading")
        .and_then(|n| n.parse::<usize>().ok())
        .map(|n| n.clamp(1, 3))
}

/// `w:b`, `w:i` are on unless `w:val` says otherwise
fn toggle_enabled(value: Option<&str>) -> bool {
    !matches!(value, Some("0") | Some("false") | Some("off"))
}

/// Resolve a relationship target against the `word/` part directory
fn resolve_part(target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("word/{}", target),
    };

    let mut parts: Vec<&str> = Vec::new();
    for component in joined.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn image_extension(part: &str) -> String {
    let ext: String = part
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    if ext.is_empty() {
        "png".to_string()
    } else {
        ext
    }
}

fn attribute(e: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>, LabError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| xml_error(DOCUMENT_PART, err))?;
        if attr.key.local_name().as_ref() == local {
            let value = attr
                .unescape_value()
                .map_err(|err| xml_error(DOCUMENT_PART, err))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn xml_error(part: &str, err: impl std::fmt::Display) -> LabError {
    LabError::conversion(format!("Malformed XML in {}: {}", part, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::archive::test_support::build_zip;
    use pretty_assertions::assert_eq;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png"/>
  <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.org" TargetMode="External"/>
</Relationships>"#;

    fn document(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:wps="http://schemas.microsoft.com/office/word/2010/wordprocessingShape" xmlns:v="urn:schemas-microsoft-com:vml">
  <w:body>
{}
  </w:body>
</w:document>"#,
            body
        )
    }

    fn docx(body: &str) -> Vec<u8> {
        let xml = document(body);
        build_zip(&[
            ("word/document.xml", xml.as_bytes()),
            ("word/_rels/document.xml.rels", RELS.as_bytes()),
            ("word/media/image1.png", PNG),
        ])
    }

    fn para(inner: &str) -> String {
        format!("<w:p>{}</w:p>", inner)
    }

    fn run(text: &str) -> String {
        format!(r#"<w:r><w:t xml:space="preserve">{}</w:t></w:r>"#, text)
    }

    #[test]
    fn test_full_document() {
        let list_props = r#"<w:pPr><w:numPr><w:ilvl w:val="0"/><w:numId w:val="1"/></w:numPr></w:pPr>"#;
        let body = [
            para(&format!(
                r#"<w:pPr><w:pStyle w:val="Heading1"/></w:pPr>{}"#,
                run("Introduction")
            )),
            para(&format!(
                r#"{}<w:r><w:rPr><w:b/></w:rPr><w:t>bold</w:t></w:r>{}<w:r><w:rPr><w:i/></w:rPr><w:t>italic</w:t></w:r>{}"#,
                run("Plain "),
                run(" and "),
                run(".")
            )),
            para(&format!("{}{}", list_props, run("first"))),
            para(&format!("{}{}", list_props, run("second"))),
            para(&format!(r#"<w:hyperlink r:id="rId2">{}</w:hyperlink>"#, run("site"))),
            para(r#"<w:r><w:drawing><a:graphic><a:graphicData><a:blip r:embed="rId1"/></a:graphicData></a:graphic></w:drawing></w:r>"#),
            format!(
                "<w:tbl><w:tr><w:tc>{}</w:tc><w:tc>{}</w:tc></w:tr><w:tr><w:tc>{}</w:tc><w:tc>{}</w:tc></w:tr></w:tbl>",
                para(&run("A")),
                para(&run("B")),
                para(&run("1")),
                para(&run("2"))
            ),
        ]
        .join("\n");

        let conversion = docx_to_markdown(&docx(&body), 1 << 20).unwrap();

        let expected = "# Introduction\n\n\
Plain **bold** and *italic*.\n\n\
- first\n\
- second\n\n\
[site](https://example.org)\n\n\
![](images/docx-1.png)\n\n\
| A | B |\n\
| --- | --- |\n\
| 1 | 2 |\n";
        assert_eq!(conversion.markdown, expected);
        assert_eq!(conversion.images.len(), 1);
        assert_eq!(conversion.images[0].0, "images/docx-1.png");
        assert_eq!(conversion.images[0].1, PNG.to_vec());
        assert!(conversion.warnings.is_empty(), "{:?}", conversion.warnings);
    }

    #[test]
    fn test_bold_disabled_by_val() {
        let body = para(r#"<w:r><w:rPr><w:b w:val="0"/></w:rPr><w:t>plain</w:t></w:r>"#);
        let conversion = docx_to_markdown(&docx(&body), 1 << 20).unwrap();
        assert_eq!(conversion.markdown, "plain\n");
    }

    #[test]
    fn test_emphasis_hugs_text() {
        let body = para(r#"<w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve"> spaced </w:t></w:r>"#);
        let conversion = docx_to_markdown(&docx(&body), 1 << 20).unwrap();
        assert_eq!(conversion.markdown, "**spaced**\n");
    }

    #[test]
    fn test_entities_unescaped() {
        let body = para(&run("a &amp; b &lt; c"));
        let conversion = docx_to_markdown(&docx(&body), 1 << 20).unwrap();
        assert_eq!(conversion.markdown, "a & b < c\n");
    }

    #[test]
    fn test_missing_relationship_is_warning() {
        let body = para(r#"<w:r><w:drawing><a:blip r:embed="rId99"/></w:drawing></w:r>"#);
        let conversion = docx_to_markdown(&docx(&body), 1 << 20).unwrap();
        assert!(conversion.images.is_empty());
        assert_eq!(
            conversion.warnings,
            vec!["[warning] Image relationship rId99 not found".to_string()]
        );
    }

    #[test]
    fn test_unknown_style_is_warning() {
        let body = para(&format!(
            r#"<w:pPr><w:pStyle w:val="FancyQuote"/></w:pPr>{}"#,
            run("quoted")
        ));
        let conversion = docx_to_markdown(&docx(&body), 1 << 20).unwrap();
        assert_eq!(conversion.markdown, "quoted\n");
        assert_eq!(
            conversion.warnings,
            vec!["[warning] Unrecognised paragraph style: FancyQuote".to_string()]
        );
    }

    #[test]
    fn test_text_box_keeps_surrounding_runs() {
        let body = para(&format!(
            r#"{}<w:r><w:drawing><wps:txbx><w:txbxContent>{}</w:txbxContent></wps:txbx></w:drawing></w:r>{}"#,
            run("Before "),
            para(&run("Box")),
            run("after")
        ));
        let conversion = docx_to_markdown(&docx(&body), 1 << 20).unwrap();
        assert_eq!(conversion.markdown, "Before Box after\n");
    }

    #[test]
    fn test_text_box_in_table_cell() {
        let body = format!(
            "<w:tbl><w:tr><w:tc>{}</w:tc></w:tr></w:tbl>",
            para(&format!(
                r#"{}<w:r><w:pict><v:textbox><w:txbxContent>{}</w:txbxContent></v:textbox></w:pict></w:r>"#,
                run("cell"),
                para(&run("boxed"))
            ))
        );
        let conversion = docx_to_markdown(&docx(&body), 1 << 20).unwrap();
        assert_eq!(conversion.markdown, "| cell boxed |\n| --- |\n");
    }

    #[test]
    fn test_not_a_word_document() {
        let zip = build_zip(&[("hello.txt", b"hi")]);
        let err = docx_to_markdown(&zip, 1 << 20).unwrap_err();
        assert!(matches!(err, LabError::Conversion { .. }));
    }

    #[test]
    fn test_malformed_xml() {
        let zip = build_zip(&[("word/document.xml", b"<w:document><w:body></w:p>")]);
        let err = docx_to_markdown(&zip, 1 << 20).unwrap_err();
        assert!(matches!(err, LabError::Conversion { .. }));
    }

    #[test]
    fn test_resolve_part() {
        assert_eq!(resolve_part("media/image1.png"), "word/media/image1.png");
        assert_eq!(resolve_part("/word/media/a.jpeg"), "word/media/a.jpeg");
        assert_eq!(resolve_part("../media/a.png"), "media/a.png");
    }

    #[test]
    fn test_heading_levels() {
        assert_eq!(heading_level("Title"), Some(1));
        assert_eq!(heading_level("Heading2"), Some(2));
        assert_eq!(heading_level("heading 3"), Some(3));
        assert_eq!(heading_level("Heading5"), Some(3));
        assert_eq!(heading_level("Normal"), None);
    }
}
