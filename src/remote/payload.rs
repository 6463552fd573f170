//! Schema-agnostic response extraction
//!
//! Remote payload schemas drift between API versions, so fields are read
//! by name with fallbacks (`start|start_sec`, `confidence|probability|
//! avg_logprob`, `speaker|speaker_id|speaker_label`) and numeric values
//! are coerced from strings. Unknown fields are ignored; missing time
//! fields default to 0.

use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::types::RawSegment;

/// Speaker id used when the payload carries none.
const DEFAULT_SPEAKER: &str = "speaker_0";

/// Parses the diarization pass. Segments come from `segments` or
/// `utterances`; each carries times, an optional confidence (possibly
/// derived from per-word values), and an inferred speaker id.
pub fn parse_diarized_segments(body: &str) -> Result<Vec<RawSegment>> {
    let value = parse_json(body)?;
    let items = array_field(&value, &["segments", "utterances"]);

    let mut segments = Vec::new();
    for item in items {
        let confidence =
            confidence_field(item).or_else(|| word_level_confidence(item.get("words")));
        segments.push(RawSegment {
            start_sec: number_field(item, &["start", "start_sec"]).unwrap_or(0.0),
            end_sec: number_field(item, &["end", "end_sec"]).unwrap_or(0.0),
            speaker_id: speaker_field(item),
            text: text_field(item),
            confidence,
        });
    }
    Ok(segments)
}

/// Parses the text pass (`verbose_json`). Speaker ids are not trusted
/// here; every segment gets the default id and is re-labeled during the
/// pass merge.
pub fn parse_text_segments(body: &str) -> Result<Vec<RawSegment>> {
    let value = parse_json(body)?;
    let items = array_field(&value, &["segments"]);

    let mut segments = Vec::new();
    for item in items {
        segments.push(RawSegment {
            start_sec: number_field(item, &["start", "start_sec"]).unwrap_or(0.0),
            end_sec: number_field(item, &["end", "end_sec"]).unwrap_or(0.0),
            speaker_id: DEFAULT_SPEAKER.to_string(),
            text: text_field(item),
            confidence: confidence_field(item),
        });
    }
    Ok(segments)
}

fn parse_json(body: &str) -> Result<Value> {
    serde_json::from_str(body).map_err(|e| PipelineError::InvalidResponse {
        message: format!("Svaret er ikke gyldig JSON: {e}"),
    })
}

fn array_field<'a>(value: &'a Value, names: &[&str]) -> Vec<&'a Value> {
    for name in names {
        if let Some(Value::Array(items)) = value.get(name) {
            return items.iter().collect();
        }
    }
    Vec::new()
}

/// Reads the first present field among `names`, coercing numbers from
/// strings where needed.
fn number_field(value: &Value, names: &[&str]) -> Option<f64> {
    for name in names {
        if let Some(v) = value.get(name) {
            if let Some(n) = coerce_number(v) {
                return Some(n);
            }
        }
    }
    None
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// `confidence` and `probability` are used as-is; `avg_logprob` is mapped
/// through `clamp(exp(x), 0, 1)`.
fn confidence_field(value: &Value) -> Option<f64> {
    if let Some(direct) = number_field(value, &["confidence", "probability"]) {
        return Some(direct);
    }
    number_field(value, &["avg_logprob"]).map(|logprob| logprob.exp().clamp(0.0, 1.0))
}

/// Mean of per-word confidences, when the segment carries a word list.
fn word_level_confidence(words: Option<&Value>) -> Option<f64> {
    let Some(Value::Array(words)) = words else {
        return None;
    };
    let values: Vec<f64> = words
        .iter()
        .filter_map(|w| number_field(w, &["confidence", "probability"]))
        .collect();
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn speaker_field(value: &Value) -> String {
    for name in ["speaker", "speaker_id", "speaker_label"] {
        match value.get(name) {
            Some(Value::Number(n)) => {
                if let Some(idx) = n.as_i64() {
                    return format!("speaker_{idx}");
                }
            }
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return DEFAULT_SPEAKER.to_string();
                }
                if let Ok(idx) = trimmed.parse::<i64>() {
                    return format!("speaker_{idx}");
                }
                return trimmed.to_string();
            }
            _ => continue,
        }
    }
    DEFAULT_SPEAKER.to_string()
}

fn text_field(value: &Value) -> String {
    value
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string()
}
