//! Plain-text serialization

use crate::export::formatter::TranscriptDocument;

/// Renders the document as text: header lines verbatim, then one
/// `number<TAB>[speaker: ]text` line per entry. Blank entries keep their
/// number so the numbering contract holds. The file ends with exactly one
/// newline.
pub fn render_txt(document: &TranscriptDocument) -> String {
    let mut out = String::new();

    for line in &document.header {
        out.push_str(line);
        out.push('\n');
    }

    for entry in &document.entries {
        out.push_str(&entry.number.to_string());
        out.push('\t');
        if let Some(speaker) = entry.speaker {
            out.push_str(speaker.as_str());
            out.push_str(": ");
        }
        out.push_str(&entry.text);
        out.push('\n');
    }

    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}
