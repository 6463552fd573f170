//! Shared export formatting
//!
//! Builds the Danish header block and the numbered line entries both the
//! TXT and DOCX serializers consume. Line numbers run contiguously from 1
//! over the full body, including blank separator entries, so citations
//! line up across formats.

use chrono::{DateTime, Utc};

use crate::export::measure;
use crate::types::{Role, Segment};

/// Body font size used for DOCX measurement.
pub const BODY_FONT_SIZE_PT: f64 = 12.0;
/// Text column width in twips (1/20 pt).
pub const TEXT_COL_WIDTH_TWIPS: u32 = 8708;
/// Cell padding subtracted from the text column before wrapping.
const WRAP_PADDING_PT: f64 = 8.0;

/// One numbered output line. `speaker` is set only on the first line of a
/// speaker block; blank separator entries carry an empty `text`.
#[derive(Debug, Clone, PartialEq)]
pub struct LineEntry {
    pub number: u32,
    pub speaker: Option<Role>,
    pub text: String,
}

impl LineEntry {
    pub fn is_blank(&self) -> bool {
        self.speaker.is_none() && self.text.is_empty()
    }
}

/// Header plus numbered body, ready for serialization.
#[derive(Debug, Clone)]
pub struct TranscriptDocument {
    pub header: Vec<String>,
    pub entries: Vec<LineEntry>,
}

impl TranscriptDocument {
    /// Builds the document with unwrapped entries (TXT export).
    pub fn new(
        segments: &[Segment],
        source_name: &str,
        source_name_override: Option<&str>,
        exported_at: DateTime<Utc>,
        duration_sec: f64,
    ) -> Self {
        Self {
            header: format_header(source_name, source_name_override, exported_at, duration_sec),
            entries: format_entries(segments, None),
        }
    }

    /// Builds the document with measurement-wrapped entries (DOCX export).
    pub fn new_wrapped(
        segments: &[Segment],
        source_name: &str,
        source_name_override: Option<&str>,
        exported_at: DateTime<Utc>,
        duration_sec: f64,
    ) -> Self {
        let max_width_pt = TEXT_COL_WIDTH_TWIPS as f64 / 20.0 - WRAP_PADDING_PT;
        Self {
            header: format_header(source_name, source_name_override, exported_at, duration_sec),
            entries: format_entries(segments, Some(max_width_pt)),
        }
    }
}

/// Fixed Danish header block: filename, date, duration in whole minutes
/// (at least 1), a blank line, the participant legend, and a final blank.
fn format_header(
    source_name: &str,
    source_name_override: Option<&str>,
    exported_at: DateTime<Utc>,
    duration_sec: f64,
) -> Vec<String> {
    let title = source_name_override.unwrap_or(source_name);
    let minutes = ((duration_sec / 60.0).round() as i64).max(1);

    vec![
        title.to_string(),
        format!("Dato: {}", exported_at.format("%d-%m-%Y")),
        format!("Varighed: {minutes} minutter"),
        String::new(),
        "Deltagere:".to_string(),
        "Interviewer (I)".to_string(),
        "Deltager (D)".to_string(),
        String::new(),
    ]
}

/// Emits the numbered body. One entry per embedded line of each segment;
/// the speaker prefix lands on the first line of each speaker block; a
/// blank entry separates speaker blocks unless the previous segment
/// already ended in a newline.
fn format_entries(segments: &[Segment], wrap_width_pt: Option<f64>) -> Vec<LineEntry> {
    let mut entries = Vec::new();
    let mut number = 1u32;
    let mut prev: Option<&Segment> = None;

    for segment in segments {
        let new_block = prev.map(|p| p.speaker != segment.speaker).unwrap_or(true);
        if new_block {
            if let Some(previous) = prev {
                if !previous.text.ends_with('\n') {
                    entries.push(LineEntry {
                        number,
                        speaker: None,
                        text: String::new(),
                    });
                    number += 1;
                }
            }
        }

        let mut first_line_of_segment = true;
        for line in segment.text.split('\n') {
            let carries_prefix = first_line_of_segment && new_block;
            let lines = match wrap_width_pt {
                Some(max_width) => {
                    let reserved = if carries_prefix {
                        measure::text_width_pt(
                            &format!("{}: ", segment.speaker),
                            BODY_FONT_SIZE_PT,
                        )
                    } else {
                        0.0
                    };
                    measure::wrap_text(line, BODY_FONT_SIZE_PT, max_width, reserved)
                }
                None => vec![line.to_string()],
            };

            for (i, fragment) in lines.into_iter().enumerate() {
                let speaker = if carries_prefix && i == 0 {
                    Some(segment.speaker)
                } else {
                    None
                };
                entries.push(LineEntry {
                    number,
                    speaker,
                    text: fragment,
                });
                number += 1;
            }
            first_line_of_segment = false;
        }

        prev = Some(segment);
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(speaker: Role, text: &str) -> Segment {
        Segment {
            start_sec: 0.0,
            end_sec: 1.0,
            speaker,
            text: text.to_string(),
            confidence: None,
        }
    }

    fn doc(segments: &[Segment]) -> TranscriptDocument {
        TranscriptDocument::new(segments, "interview.m4a", None, Utc::now(), 600.0)
    }

    #[test]
    fn header_has_fixed_danish_shape() {
        let document = doc(&[]);
        assert_eq!(document.header.len(), 8);
        assert_eq!(document.header[0], "interview.m4a");
        assert!(document.header[1].starts_with("Dato: "));
        assert_eq!(document.header[2], "Varighed: 10 minutter");
        assert_eq!(document.header[4], "Deltagere:");
        assert_eq!(document.header[5], "Interviewer (I)");
        assert_eq!(document.header[6], "Deltager (D)");
    }

    #[test]
    fn duration_clamps_to_one_minute() {
        let document =
            TranscriptDocument::new(&[], "kort.m4a", None, Utc::now(), 12.0);
        assert_eq!(document.header[2], "Varighed: 1 minutter");
    }

    #[test]
    fn override_replaces_filename() {
        let document =
            TranscriptDocument::new(&[], "a.m4a", Some("Interview med Anna"), Utc::now(), 60.0);
        assert_eq!(document.header[0], "Interview med Anna");
    }

    #[test]
    fn numbers_are_contiguous_and_prefix_sits_on_block_start() {
        let document = doc(&[
            segment(Role::I, "Spørgsmål"),
            segment(Role::I, "Opfølgning"),
            segment(Role::D, "Svar\nover to linjer"),
        ]);

        for (i, entry) in document.entries.iter().enumerate() {
            assert_eq!(entry.number as usize, i + 1);
        }

        // I-block: prefix on the first entry only, continuation unprefixed
        assert_eq!(document.entries[0].speaker, Some(Role::I));
        assert_eq!(document.entries[1].speaker, None);
        // blank separator before the D-block
        assert!(document.entries[2].is_blank());
        assert_eq!(document.entries[3].speaker, Some(Role::D));
        assert_eq!(document.entries[4].speaker, None);
        assert_eq!(document.entries[4].text, "over to linjer");
    }

    #[test]
    fn wrapped_long_line_spans_multiple_numbered_rows() {
        // S5: a 200-character utterance must occupy at least two rows with
        // the prefix only on the first
        let long = "Dette er en meget lang udtalelse fra intervieweren som bliver ved og ved \
                    med at forklare alle detaljer omkring det første møde i projektet og som \
                    derfor helt sikkert skal ombrydes over flere linjer i dokumentet";
        assert!(long.chars().count() >= 200);

        let document = TranscriptDocument::new_wrapped(
            &[segment(Role::I, long)],
            "interview.m4a",
            None,
            Utc::now(),
            60.0,
        );

        assert!(document.entries.len() >= 2);
        assert_eq!(document.entries[0].speaker, Some(Role::I));
        for entry in &document.entries[1..] {
            assert_eq!(entry.speaker, None);
        }
        for (i, entry) in document.entries.iter().enumerate() {
            assert_eq!(entry.number as usize, i + 1);
        }
    }

    #[test]
    fn no_double_blank_after_trailing_newline() {
        let document = doc(&[segment(Role::I, "Afslutter med linjeskift\n"), segment(Role::D, "Svar")]);

        // The trailing newline already yields an empty entry; no second
        // blank should be inserted before the speaker change.
        let blank_count = document.entries.iter().filter(|e| e.is_blank()).count();
        assert_eq!(blank_count, 1);
    }
}
