//! Transcript editor round-trip
//!
//! The shell lets the user edit the transcript as plain text, one
//! utterance per `I:`/`D:` line. Parsing is tolerant of what editors and
//! clipboards do to such text: leading line numbers, full-width colons,
//! and invisible prefix characters are all accepted. Rendering produces
//! the canonical form that parses back to the same segments.

use crate::error::{PipelineError, Result};
use crate::types::{Role, Segment};

/// Invisible characters tolerated (and stripped) at the start of a line:
/// BOM, zero-width space, zero-width non-joiner, zero-width joiner, and
/// word joiner.
const INVISIBLE_PREFIX: &[char] = &['\u{FEFF}', '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}'];

/// Synthesized utterance stride: segment `i` gets `[3i, 3i+1]`.
const SYNTHETIC_STRIDE_SEC: f64 = 3.0;

/// Parses editor text into segments. `prior` is the transcript the text
/// was rendered from; confidences are carried over by index.
pub fn parse(text: &str, prior: &[Segment]) -> Result<Vec<Segment>> {
    let mut utterances: Vec<(Role, String)> = Vec::new();
    let mut open = false;

    for (line_no, raw_line) in text.lines().enumerate() {
        let line_no = line_no + 1;
        let line = clean_line(raw_line);

        if line.trim().is_empty() {
            open = false;
            continue;
        }

        match parse_prefixed_line(&line) {
            Some((speaker, body)) => {
                if body.is_empty() {
                    return Err(PipelineError::parsing(format!(
                        "linje {line_no}: der mangler tekst efter {}-præfikset",
                        speaker
                    )));
                }
                utterances.push((speaker, body.to_string()));
                open = true;
            }
            None => {
                if !open {
                    return Err(PipelineError::parsing(format!(
                        "linje {line_no}: linjen mangler et I:- eller D:-præfiks"
                    )));
                }
                // Continuation: keep the line verbatim, joined by newline
                let last = utterances.last_mut().expect("open utterance exists");
                last.1.push('\n');
                last.1.push_str(&line);
            }
        }
    }

    Ok(utterances
        .into_iter()
        .enumerate()
        .map(|(i, (speaker, text))| {
            let start_sec = i as f64 * SYNTHETIC_STRIDE_SEC;
            Segment {
                start_sec,
                end_sec: start_sec + 1.0,
                speaker,
                text,
                confidence: prior.get(i).and_then(|s| s.confidence),
            }
        })
        .collect())
}

/// Renders segments to the editor format: one `SPEAKER: text` line per
/// segment, continuation lines without prefix, and a single blank line at
/// every speaker change.
pub fn render(segments: &[Segment]) -> String {
    let mut out = String::new();
    let mut prev: Option<&Segment> = None;

    for segment in segments {
        if let Some(previous) = prev {
            let speaker_changed = previous.speaker != segment.speaker;
            // A text that already ends in a newline produced its own blank
            // line; adding another would double it.
            if speaker_changed && !previous.text.ends_with('\n') {
                out.push('\n');
            }
        }

        let mut lines = segment.text.split('\n');
        let first = lines.next().unwrap_or("");
        out.push_str(segment.speaker.as_str());
        out.push_str(": ");
        out.push_str(first);
        out.push('\n');
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }

        prev = Some(segment);
    }

    out
}

fn clean_line(raw: &str) -> String {
    raw.trim_end_matches('\r')
        .trim_start_matches(INVISIBLE_PREFIX)
        .to_string()
}

/// Recognizes `I: …` / `D: …`, tolerating a leading line number
/// (`1) I: …`, `2. D: …`), spaces before the colon, and the full-width
/// colon `：`.
fn parse_prefixed_line(line: &str) -> Option<(Role, &str)> {
    let mut rest = line.trim_start();

    // Optional leading line number
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let after_digits = &rest[digits..];
        let after_marker = after_digits
            .strip_prefix(')')
            .or_else(|| after_digits.strip_prefix('.'))
            .unwrap_or(after_digits);
        if after_marker.starts_with(char::is_whitespace) {
            rest = after_marker.trim_start();
        }
    }

    let speaker = match rest.chars().next()? {
        'I' => Role::I,
        'D' => Role::D,
        _ => return None,
    };

    let after_role = rest[1..].trim_start();
    let body = after_role
        .strip_prefix(':')
        .or_else(|| after_role.strip_prefix('：'))?;
    Some((speaker, body.trim_start()))
}
