//! Two-pass remote transcription engine
//!
//! Per chunk: a diarization pass (speaker-labeled time ranges) and a text
//! pass (verbose segments), merged by temporal overlap. Each pass retries
//! with doubling backoff plus jitter; the diarization pass negotiates
//! `response_format` down from `diarized_json` to `json` when the server
//! rejects the richer format.

use rand::Rng;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::error::{PipelineError, Result};
use crate::remote::{payload, TranscriptionTransport, TransportError, UploadRequest};
use crate::types::{RawSegment, TranscriptionOutput};

/// Backoff doubles per failed attempt but never exceeds this.
const MAX_BACKOFF_SEC: f64 = 12.0;
/// Uniform jitter added on top of every backoff sleep.
const JITTER_RANGE_SEC: (f64, f64) = (0.05, 0.40);

/// Formats tried for the diarization pass, in order.
const DIARIZE_FORMATS: &[&str] = &["diarized_json", "json"];
/// Format for the text pass.
const TEXT_FORMAT: &str = "verbose_json";

/// The diarizer requires a chunking strategy for audio longer than 30 s.
const DIARIZE_CHUNKING_STRATEGY: &str = "auto";

pub struct RemoteEngine<T: TranscriptionTransport> {
    transport: T,
    config: RemoteConfig,
    /// First backoff sleep in seconds. Overridable so scripted tests do
    /// not wait out real backoff windows.
    backoff_initial_sec: f64,
}

enum AttemptOutcome {
    Success(String),
    /// Server rejected the requested `response_format`; switch formats
    /// without consuming retry budget.
    UnsupportedFormat,
}

impl<T: TranscriptionTransport> RemoteEngine<T> {
    pub fn new(transport: T, config: RemoteConfig) -> Self {
        Self {
            transport,
            config,
            backoff_initial_sec: 1.0,
        }
    }

    #[cfg(test)]
    pub fn with_backoff_initial(mut self, seconds: f64) -> Self {
        self.backoff_initial_sec = seconds;
        self
    }

    /// Transcribes one rendered chunk. Output times are chunk-local.
    pub async fn transcribe_chunk(&self, chunk_path: &Path) -> Result<TranscriptionOutput> {
        let diarized = self.diarize_pass(chunk_path).await?;
        let text = self.text_pass(chunk_path).await?;
        merge_passes(diarized, text)
    }

    async fn diarize_pass(&self, chunk_path: &Path) -> Result<Vec<RawSegment>> {
        for (i, format) in DIARIZE_FORMATS.iter().enumerate() {
            let request = UploadRequest {
                model: self.config.diarize_model.clone(),
                language: self.config.language.clone(),
                response_format: format.to_string(),
                chunking_strategy: Some(DIARIZE_CHUNKING_STRATEGY.to_string()),
                file_path: chunk_path.to_path_buf(),
            };

            match self.attempt_with_retries(&request).await? {
                AttemptOutcome::Success(body) => return payload::parse_diarized_segments(&body),
                AttemptOutcome::UnsupportedFormat => {
                    if let Some(next) = DIARIZE_FORMATS.get(i + 1) {
                        debug!("Diarizer rejected response_format={format}, trying {next}");
                    }
                }
            }
        }

        Err(PipelineError::remote_request(
            "tjenesten accepterede ingen af de kendte svarformater",
        ))
    }

    async fn text_pass(&self, chunk_path: &Path) -> Result<Vec<RawSegment>> {
        let request = UploadRequest {
            model: self.config.text_model.clone(),
            language: self.config.language.clone(),
            response_format: TEXT_FORMAT.to_string(),
            chunking_strategy: None,
            file_path: chunk_path.to_path_buf(),
        };

        match self.attempt_with_retries(&request).await? {
            AttemptOutcome::Success(body) => payload::parse_text_segments(&body),
            AttemptOutcome::UnsupportedFormat => Err(PipelineError::remote_request(
                "tjenesten afviste verbose_json for tekstpasset",
            )),
        }
    }

    /// Runs one upload with up to `max_retries` attempts. Unsupported-
    /// format rejections return immediately; every other failure sleeps
    /// backoff + jitter and tries again.
    async fn attempt_with_retries(&self, request: &UploadRequest) -> Result<AttemptOutcome> {
        let mut backoff = self.backoff_initial_sec;
        let mut last_error: Option<PipelineError> = None;

        for attempt in 1..=self.config.max_retries.max(1) {
            match self.transport.upload(request).await {
                Ok(response) if response.is_success() => {
                    return Ok(AttemptOutcome::Success(response.body));
                }
                Ok(response) if is_unsupported_format(&response.body) => {
                    return Ok(AttemptOutcome::UnsupportedFormat);
                }
                Ok(response) => {
                    let error = PipelineError::remote_request(format!(
                        "HTTP {}: {}",
                        response.status,
                        response.body.trim()
                    ));
                    warn!(
                        "Upload attempt {attempt}/{} failed: {error}",
                        self.config.max_retries
                    );
                    last_error = Some(error);
                }
                Err(TransportError::Timeout) => {
                    let error = PipelineError::remote_timeout(self.config.request_timeout_sec);
                    warn!(
                        "Upload attempt {attempt}/{} timed out",
                        self.config.max_retries
                    );
                    last_error = Some(error);
                }
                Err(TransportError::Network(detail)) => {
                    let error = PipelineError::remote_request(detail);
                    warn!(
                        "Upload attempt {attempt}/{} failed: {error}",
                        self.config.max_retries
                    );
                    last_error = Some(error);
                }
            }

            if attempt < self.config.max_retries {
                let jitter = rand::thread_rng().gen_range(JITTER_RANGE_SEC.0..=JITTER_RANGE_SEC.1);
                tokio::time::sleep(Duration::from_secs_f64(backoff + jitter)).await;
                backoff = (backoff * 2.0).min(MAX_BACKOFF_SEC);
            }
        }

        Err(last_error.unwrap_or_else(|| {
            PipelineError::remote_request("alle forsøg er opbrugt uden svar")
        }))
    }
}

/// Format rejections are announced in the error body rather than a
/// distinct status code.
fn is_unsupported_format(body: &str) -> bool {
    body.contains("response_format") || body.contains("unsupported_value")
}

/// Merges the two passes: every text segment takes the speaker of the
/// diarized segment with the largest temporal overlap, falling back to
/// the nearest by midpoint when nothing overlaps.
fn merge_passes(
    diarized: Vec<RawSegment>,
    text: Vec<RawSegment>,
) -> Result<TranscriptionOutput> {
    if text.is_empty() && diarized.is_empty() {
        return Err(PipelineError::InvalidResponse {
            message: "Tjenesten returnerede ingen segmenter".to_string(),
        });
    }

    // Diarization-only fallback: the text pass produced nothing usable.
    if text.is_empty() {
        return Ok(TranscriptionOutput::new(diarized));
    }

    let mut merged = Vec::with_capacity(text.len());
    for segment in text {
        let speaker_id = match best_speaker(&segment, &diarized) {
            Some(id) => id,
            None => segment.speaker_id.clone(),
        };
        merged.push(RawSegment {
            speaker_id,
            ..segment
        });
    }
    Ok(TranscriptionOutput::new(merged))
}

fn best_speaker(segment: &RawSegment, diarized: &[RawSegment]) -> Option<String> {
    if diarized.is_empty() {
        return None;
    }

    let mut best_overlap = 0.0f64;
    let mut best: Option<&RawSegment> = None;
    for candidate in diarized {
        let overlap = (segment.end_sec.min(candidate.end_sec)
            - segment.start_sec.max(candidate.start_sec))
        .max(0.0);
        if overlap > best_overlap {
            best_overlap = overlap;
            best = Some(candidate);
        }
    }

    if let Some(candidate) = best {
        return Some(candidate.speaker_id.clone());
    }

    // No overlap at all: nearest diarized segment by midpoint distance
    let midpoint = (segment.start_sec + segment.end_sec) / 2.0;
    diarized
        .iter()
        .min_by(|a, b| {
            let da = ((a.start_sec + a.end_sec) / 2.0 - midpoint).abs();
            let db = ((b.start_sec + b.end_sec) / 2.0 - midpoint).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|s| s.speaker_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::TransportResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted transport: plays back a fixed sequence of outcomes and
    /// records every request it saw.
    struct ScriptedTransport {
        script: Mutex<Vec<std::result::Result<TransportResponse, TransportError>>>,
        pub seen: Mutex<Vec<UploadRequest>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<std::result::Result<TransportResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn ok(body: &str) -> std::result::Result<TransportResponse, TransportError> {
            Ok(TransportResponse {
                status: 200,
                body: body.to_string(),
            })
        }

        fn http(status: u16, body: &str) -> std::result::Result<TransportResponse, TransportError> {
            Ok(TransportResponse {
                status,
                body: body.to_string(),
            })
        }
    }

    #[async_trait]
    impl TranscriptionTransport for ScriptedTransport {
        async fn upload(
            &self,
            request: &UploadRequest,
        ) -> std::result::Result<TransportResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(TransportError::Network("script exhausted".to_string()));
            }
            script.remove(0)
        }
    }

    const DIARIZE_BODY: &str = r#"{"segments": [
        {"start": 0.0, "end": 4.0, "speaker": 0, "text": "", "confidence": 0.9},
        {"start": 4.0, "end": 8.0, "speaker": 1, "text": "", "confidence": 0.9}
    ]}"#;

    const TEXT_BODY: &str = r#"{"segments": [
        {"start": 0.5, "end": 3.5, "text": "Hvordan går det?", "avg_logprob": -0.1},
        {"start": 4.2, "end": 7.5, "text": "Det går fint.", "avg_logprob": -0.2}
    ]}"#;

    fn config(max_retries: u32) -> RemoteConfig {
        RemoteConfig {
            max_retries,
            request_timeout_sec: 123,
            ..RemoteConfig::default()
        }
    }

    #[tokio::test]
    async fn timeout_then_success_totals_three_uploads() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            ScriptedTransport::ok(DIARIZE_BODY),
            ScriptedTransport::ok(TEXT_BODY),
        ]);
        let engine = RemoteEngine::new(transport, config(5)).with_backoff_initial(0.0);

        let output = engine
            .transcribe_chunk(Path::new("/tmp/chunk_0000.m4a"))
            .await
            .unwrap();

        assert_eq!(output.segments.len(), 2);
        assert_eq!(output.segments[0].speaker_id, "speaker_0");
        assert_eq!(output.segments[1].speaker_id, "speaker_1");
        assert_eq!(engine.transport.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn format_negotiation_steps_down_to_json() {
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::http(
                400,
                r#"{"error": {"code": "unsupported_value", "param": "response_format"}}"#,
            ),
            ScriptedTransport::ok(DIARIZE_BODY),
            ScriptedTransport::ok(TEXT_BODY),
        ]);
        let engine = RemoteEngine::new(transport, config(5)).with_backoff_initial(0.0);

        engine
            .transcribe_chunk(Path::new("/tmp/chunk_0000.m4a"))
            .await
            .unwrap();

        let seen = engine.transport.seen.lock().unwrap();
        let formats: Vec<&str> = seen.iter().map(|r| r.response_format.as_str()).collect();
        assert_eq!(formats, vec!["diarized_json", "json", "verbose_json"]);
    }

    #[tokio::test]
    async fn repeated_timeouts_surface_configured_seconds_once() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
        ]);
        let engine = RemoteEngine::new(transport, config(2)).with_backoff_initial(0.0);

        let error = engine
            .transcribe_chunk(Path::new("/tmp/chunk_0000.m4a"))
            .await
            .unwrap_err();

        let message = error.to_string();
        assert!(message.contains("timed out efter 123"), "was: {message}");
        assert!(!message.contains(PipelineError::REQUEST_FAILED_PREFIX));
    }

    #[tokio::test]
    async fn chunking_strategy_only_on_diarize_pass() {
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::ok(DIARIZE_BODY),
            ScriptedTransport::ok(TEXT_BODY),
        ]);
        let engine = RemoteEngine::new(transport, config(5)).with_backoff_initial(0.0);

        engine
            .transcribe_chunk(Path::new("/tmp/chunk_0000.m4a"))
            .await
            .unwrap();

        let seen = engine.transport.seen.lock().unwrap();
        assert_eq!(seen[0].chunking_strategy.as_deref(), Some("auto"));
        assert!(seen[1].chunking_strategy.is_none());
    }

    #[tokio::test]
    async fn empty_text_pass_returns_diarization_verbatim() {
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::ok(DIARIZE_BODY),
            ScriptedTransport::ok(r#"{"segments": []}"#),
        ]);
        let engine = RemoteEngine::new(transport, config(5)).with_backoff_initial(0.0);

        let output = engine
            .transcribe_chunk(Path::new("/tmp/chunk_0000.m4a"))
            .await
            .unwrap();

        assert_eq!(output.segments.len(), 2);
        assert_eq!(output.average_confidence, Some(0.9));
    }

    #[tokio::test]
    async fn both_passes_empty_is_invalid_response() {
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::ok(r#"{"segments": []}"#),
            ScriptedTransport::ok(r#"{"segments": []}"#),
        ]);
        let engine = RemoteEngine::new(transport, config(5)).with_backoff_initial(0.0);

        let error = engine
            .transcribe_chunk(Path::new("/tmp/chunk_0000.m4a"))
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::InvalidResponse { .. }));
    }

    #[test]
    fn no_overlap_assigns_nearest_by_midpoint() {
        let diarized = vec![
            RawSegment::new(0.0, 2.0, "speaker_0", "", None),
            RawSegment::new(10.0, 12.0, "speaker_1", "", None),
        ];
        let text = vec![RawSegment::new(8.0, 9.0, "speaker_0", "Sent ord", None)];

        let output = merge_passes(diarized, text).unwrap();
        assert_eq!(output.segments[0].speaker_id, "speaker_1");
    }
}
