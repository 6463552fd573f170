//! Transcript export
//!
//! A shared formatter produces the header block and the numbered line
//! entries; the TXT and DOCX serializers only differ in how they write
//! those entries out. Line numbering is part of the citation contract
//! researchers rely on, so both formats must agree on it.

pub mod docx;
pub mod formatter;
pub mod measure;
pub mod txt;

pub use docx::render_docx;
pub use formatter::{LineEntry, TranscriptDocument};
pub use txt::render_txt;

use crate::error::Result;
use crate::types::JobResult;
use chrono::Utc;

/// Serializes a finished job as numbered plain text.
pub fn export_txt(result: &JobResult, source_name_override: Option<&str>) -> String {
    let document = TranscriptDocument::new(
        &result.transcript,
        &result.source_name,
        source_name_override,
        Utc::now(),
        result.duration_sec.unwrap_or(0.0),
    );
    render_txt(&document)
}

/// Serializes a finished job as a DOCX package with pre-wrapped rows.
pub fn export_docx(result: &JobResult, source_name_override: Option<&str>) -> Result<Vec<u8>> {
    let document = TranscriptDocument::new_wrapped(
        &result.transcript,
        &result.source_name,
        source_name_override,
        Utc::now(),
        result.duration_sec.unwrap_or(0.0),
    );
    render_docx(&document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobStatus, Role, Segment};
    use uuid::Uuid;

    fn result() -> JobResult {
        JobResult {
            job_id: Uuid::new_v4(),
            source_name: "interview.m4a".to_string(),
            status: JobStatus::Ready,
            duration_sec: Some(300.0),
            transcript: vec![
                Segment {
                    start_sec: 0.0,
                    end_sec: 2.0,
                    speaker: Role::I,
                    text: "Hvordan gik det?".to_string(),
                    confidence: None,
                },
                Segment {
                    start_sec: 3.0,
                    end_sec: 5.0,
                    speaker: Role::D,
                    text: "Rigtig fint.".to_string(),
                    confidence: None,
                },
            ],
            error_message: None,
        }
    }

    #[test]
    fn both_formats_share_the_numbering_contract() {
        let result = result();
        let txt = export_txt(&result, None);
        let docx = export_docx(&result, None).unwrap();

        // Entry 3 is the participant line in both serializations
        assert!(txt.contains("3\tD: Rigtig fint."));
        assert!(!docx.is_empty());
    }

    #[test]
    fn override_flows_into_the_header() {
        let txt = export_txt(&result(), Some("Samtale med Bo"));
        assert!(txt.starts_with("Samtale med Bo\n"));
    }
}
