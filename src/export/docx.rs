//! DOCX serialization
//!
//! Assembles a minimal WordprocessingML package: one fixed-layout table
//! with a number column, a gap column, and the text column. Long lines
//! are already wrapped by the formatter, so every entry maps to exactly
//! one table row. Row heights use the `atLeast` rule so content can grow
//! a row; `exact` would clip wrapped text.

use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{PipelineError, Result};
use crate::export::formatter::{LineEntry, TranscriptDocument, TEXT_COL_WIDTH_TWIPS};

/// Column widths in twips: line numbers, gap, text.
const NUMBER_COL_WIDTH_TWIPS: u32 = 601;
const GAP_COL_WIDTH_TWIPS: u32 = 329;
/// Page margins in twips.
const MARGIN_TOP_BOTTOM_TWIPS: u32 = 1701;
const MARGIN_LEFT_RIGHT_TWIPS: u32 = 1134;
/// Minimum row height in twips, grown by content (`atLeast`).
const ROW_MIN_HEIGHT_TWIPS: u32 = 283;
/// Body size in half-points (12 pt).
const BODY_SIZE_HALF_POINTS: u32 = 24;

/// Serializes the document into DOCX bytes.
pub fn render_docx(document: &TranscriptDocument) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    let parts: [(&str, String); 5] = [
        ("[Content_Types].xml", content_types_xml()),
        ("_rels/.rels", package_rels_xml()),
        ("word/_rels/document.xml.rels", document_rels_xml()),
        ("word/styles.xml", styles_xml()),
        ("word/document.xml", document_xml(document)),
    ];

    for (name, content) in parts {
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer
            .start_file(name, options)
            .and_then(|_| writer.write_all(content.as_bytes()).map_err(Into::into))
            .map_err(|e| PipelineError::parsing(format!("DOCX-pakken kunne ikke skrives: {e}")))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| PipelineError::parsing(format!("DOCX-pakken kunne ikke afsluttes: {e}")))?;
    Ok(cursor.into_inner())
}

fn content_types_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="xml" ContentType="application/xml"/>
  <Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
  <Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/>
</Types>
"#
    .to_string()
}

fn package_rels_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>
</Relationships>
"#
    .to_string()
}

fn document_rels_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
</Relationships>
"#
    .to_string()
}

/// Document defaults: minor-Latin theme face at 12 pt.
fn styles_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:docDefaults>
    <w:rPrDefault>
      <w:rPr>
        <w:rFonts w:asciiTheme="minorHAnsi" w:hAnsiTheme="minorHAnsi"/>
        <w:sz w:val="{size}"/>
        <w:szCs w:val="{size}"/>
      </w:rPr>
    </w:rPrDefault>
  </w:docDefaults>
</w:styles>
"#,
        size = BODY_SIZE_HALF_POINTS
    )
}

fn document_xml(document: &TranscriptDocument) -> String {
    let mut body = String::new();

    for line in &document.header {
        body.push_str(&header_paragraph(line));
    }

    body.push_str(&table_open());
    for entry in &document.entries {
        body.push_str(&table_row(entry));
    }
    body.push_str("</w:tbl>");

    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
{body}
    <w:sectPr>
      <w:pgMar w:top="{tb}" w:right="{lr}" w:bottom="{tb}" w:left="{lr}" w:header="708" w:footer="708" w:gutter="0"/>
    </w:sectPr>
  </w:body>
</w:document>
"#,
        body = body,
        tb = MARGIN_TOP_BOTTOM_TWIPS,
        lr = MARGIN_LEFT_RIGHT_TWIPS,
    )
}

fn header_paragraph(text: &str) -> String {
    if text.is_empty() {
        return "<w:p/>".to_string();
    }
    format!(
        "<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
        escape_xml(text)
    )
}

fn table_open() -> String {
    let total = NUMBER_COL_WIDTH_TWIPS + GAP_COL_WIDTH_TWIPS + TEXT_COL_WIDTH_TWIPS;
    format!(
        "<w:tbl><w:tblPr><w:tblW w:w=\"{total}\" w:type=\"dxa\"/><w:tblLayout w:type=\"fixed\"/></w:tblPr>\
         <w:tblGrid><w:gridCol w:w=\"{num}\"/><w:gridCol w:w=\"{gap}\"/><w:gridCol w:w=\"{text}\"/></w:tblGrid>",
        num = NUMBER_COL_WIDTH_TWIPS,
        gap = GAP_COL_WIDTH_TWIPS,
        text = TEXT_COL_WIDTH_TWIPS,
    )
}

fn table_row(entry: &LineEntry) -> String {
    let mut text_runs = String::new();
    if let Some(speaker) = entry.speaker {
        // Speaker prefix appears exactly once per block, in bold
        text_runs.push_str(&format!(
            "<w:r><w:rPr><w:b/></w:rPr><w:t xml:space=\"preserve\">{}: </w:t></w:r>",
            speaker.as_str()
        ));
    }
    if !entry.text.is_empty() {
        text_runs.push_str(&format!(
            "<w:r><w:t xml:space=\"preserve\">{}</w:t></w:r>",
            escape_xml(&entry.text)
        ));
    }

    format!(
        "<w:tr><w:trPr><w:trHeight w:val=\"{height}\" w:hRule=\"atLeast\"/></w:trPr>\
         <w:tc><w:tcPr><w:tcW w:w=\"{num}\" w:type=\"dxa\"/></w:tcPr><w:p><w:r><w:t>{number}</w:t></w:r></w:p></w:tc>\
         <w:tc><w:tcPr><w:tcW w:w=\"{gap}\" w:type=\"dxa\"/></w:tcPr><w:p/></w:tc>\
         <w:tc><w:tcPr><w:tcW w:w=\"{text_w}\" w:type=\"dxa\"/></w:tcPr><w:p>{runs}</w:p></w:tc>\
         </w:tr>",
        height = ROW_MIN_HEIGHT_TWIPS,
        num = NUMBER_COL_WIDTH_TWIPS,
        number = entry.number,
        gap = GAP_COL_WIDTH_TWIPS,
        text_w = TEXT_COL_WIDTH_TWIPS,
        runs = text_runs,
    )
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
