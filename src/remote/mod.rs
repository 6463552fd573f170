//! Remote diarizing transcription
//!
//! Drives the hosted `/v1/audio/transcriptions` endpoint twice per chunk
//! (diarization pass + text pass) and merges the passes into speaker-
//! labeled raw segments. The transport trait isolates HTTP so retry,
//! negotiation, and timeout behavior are testable with scripted fakes.

pub mod engine;
pub mod http;
pub mod payload;

use async_trait::async_trait;
use std::path::PathBuf;

pub use engine::RemoteEngine;
pub use http::HttpTransport;

/// One multipart upload. Field order is part of the wire contract:
/// `model`, `language`, `response_format`, optional `chunking_strategy`,
/// then the file part.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub model: String,
    pub language: String,
    pub response_format: String,
    pub chunking_strategy: Option<String>,
    pub file_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failures, classified so the engine can phrase timeout
/// messages with the configured seconds and nothing else.
#[derive(Debug, Clone)]
pub enum TransportError {
    Timeout,
    Network(String),
}

#[async_trait]
pub trait TranscriptionTransport: Send + Sync {
    async fn upload(
        &self,
        request: &UploadRequest,
    ) -> std::result::Result<TransportResponse, TransportError>;
}
