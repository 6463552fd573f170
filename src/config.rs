//! Pipeline configuration
//!
//! Tunables for chunking, the remote API, and the local fallback engine.
//! Defaults mirror production settings; tests override freely via struct
//! update syntax.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// File extensions accepted at the job boundary.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "m4a", "wav", "mp4", "mov"];

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub remote: RemoteConfig,
    pub fallback: FallbackConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            remote: RemoteConfig::default(),
            fallback: FallbackConfig::default(),
        }
    }
}

/// Chunk planning and media probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Nominal chunk length in seconds.
    pub chunk_duration_sec: f64,
    /// Overlap carried into the next chunk, in seconds.
    pub overlap_sec: f64,
    /// Wall-clock bound on the duration probe. A hung media layer must not
    /// stall a job.
    pub probe_timeout_sec: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_duration_sec: 240.0,
            overlap_sec: 1.5,
            probe_timeout_sec: 25,
        }
    }
}

/// Remote transcription API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub endpoint: String,
    /// Diarizing model used for the first pass.
    pub diarize_model: String,
    /// Speech-to-text model used for the second pass.
    pub text_model: String,
    /// BCP-47 language hint sent with every upload.
    pub language: String,
    /// Upper bound on attempts per pass.
    pub max_retries: u32,
    /// Per-request timeout in seconds (connect + first response).
    pub request_timeout_sec: u64,
    /// Overall resource timeout in seconds (full body transfer).
    pub resource_timeout_sec: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            diarize_model: "gpt-4o-transcribe-diarize".to_string(),
            text_model: "gpt-4o-transcribe".to_string(),
            language: "da".to_string(),
            max_retries: 5,
            request_timeout_sec: 60,
            resource_timeout_sec: 300,
        }
    }
}

/// Local fallback recognizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Explicit path to the whisper.cpp CLI; discovered via PATH when None.
    pub binary_path: Option<PathBuf>,
    /// Path to the ggml model file.
    pub model_path: Option<PathBuf>,
    /// Recognition language.
    pub language: String,
    /// Assumed chunk length used when estimating per-sentence durations.
    pub nominal_chunk_sec: f64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            model_path: None,
            language: "da".to_string(),
            nominal_chunk_sec: 240.0,
        }
    }
}

/// True when `path` carries a supported media extension.
pub fn is_supported_media(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn defaults_match_production_settings() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.chunking.chunk_duration_sec, 240.0);
        assert_eq!(cfg.chunking.overlap_sec, 1.5);
        assert_eq!(cfg.remote.max_retries, 5);
        assert_eq!(cfg.chunking.probe_timeout_sec, 25);
    }

    #[test]
    fn media_boundary_accepts_known_extensions() {
        assert!(is_supported_media(Path::new("interview.M4A")));
        assert!(is_supported_media(Path::new("optagelse.mp3")));
        assert!(!is_supported_media(Path::new("notes.txt")));
        assert!(!is_supported_media(Path::new("no_extension")));
    }
}
