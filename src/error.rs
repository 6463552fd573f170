//! Pipeline error taxonomy
//!
//! All user-visible failures of the transcription pipeline. The desktop
//! shell maps these to banners; messages are Danish where the user sees
//! them verbatim.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Lydfilen findes ikke længere: {path}")]
    SourceMissing { path: PathBuf },

    #[error("Der er ikke angivet en API-nøgle")]
    ApiKeyMissing,

    #[error("Der kører allerede en transskribering")]
    Busy,

    #[error("Ugyldigt svar fra transskriberingstjenesten: {message}")]
    InvalidResponse { message: String },

    #[error("{message}")]
    RemoteRequestFailed { message: String },

    #[error("Lokal transskribering er ikke tilgængelig: {message}")]
    FallbackUnavailable { message: String },

    #[error("{message}")]
    LowSpeakerConfidence { message: String },

    #[error("{message}")]
    ParsingFailed { message: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl PipelineError {
    /// Generic wrapper prefix for remote request failures. Timeout messages
    /// are built without it so they are never wrapped twice.
    pub const REQUEST_FAILED_PREFIX: &'static str = "Forespørgslen til tjenesten fejlede";

    pub fn remote_request(detail: impl Into<String>) -> Self {
        Self::RemoteRequestFailed {
            message: format!("{}: {}", Self::REQUEST_FAILED_PREFIX, detail.into()),
        }
    }

    pub fn remote_timeout(timeout_secs: u64) -> Self {
        Self::RemoteRequestFailed {
            message: format!(
                "Netværksforbindelsen timed out efter {} sekunder",
                timeout_secs
            ),
        }
    }

    pub fn parsing(detail: impl Into<String>) -> Self {
        Self::ParsingFailed {
            message: detail.into(),
        }
    }

    /// True for the resumable pause condition (fallback quality gate).
    pub fn is_low_confidence(&self) -> bool {
        matches!(self, Self::LowSpeakerConfidence { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_configured_seconds() {
        let err = PipelineError::remote_timeout(123);
        let msg = err.to_string();
        assert!(msg.contains("timed out efter 123"));
        assert!(!msg.contains(PipelineError::REQUEST_FAILED_PREFIX));
    }

    #[test]
    fn request_failure_carries_single_wrapper() {
        let err = PipelineError::remote_request("HTTP 500: serverfejl");
        let msg = err.to_string();
        assert_eq!(msg.matches(PipelineError::REQUEST_FAILED_PREFIX).count(), 1);
    }
}
