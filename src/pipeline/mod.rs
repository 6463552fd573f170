//! Job orchestration
//!
//! The coordinator owns the single active job, the store handle, and the
//! progress broadcast; the runner executes the chunk ladder. Engines sit
//! behind the [`ChunkTranscriber`] trait so scripted implementations can
//! drive the state machine in tests.

pub mod coordinator;
pub mod runner;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::{FallbackConfig, RemoteConfig};
use crate::error::Result;
use crate::fallback::{FallbackEngine, SpeechRecognizer, WhisperCliRecognizer};
use crate::remote::{HttpTransport, RemoteEngine, TranscriptionTransport};
use crate::types::TranscriptionOutput;

pub use coordinator::Coordinator;

/// A per-chunk transcription engine. Output times are chunk-local; the
/// runner globalizes them before persistence.
#[async_trait]
pub trait ChunkTranscriber: Send + Sync {
    async fn transcribe_chunk(&self, chunk_path: &Path) -> Result<TranscriptionOutput>;
}

#[async_trait]
impl<T: TranscriptionTransport + 'static> ChunkTranscriber for RemoteEngine<T> {
    async fn transcribe_chunk(&self, chunk_path: &Path) -> Result<TranscriptionOutput> {
        RemoteEngine::transcribe_chunk(self, chunk_path).await
    }
}

#[async_trait]
impl<R: SpeechRecognizer + 'static> ChunkTranscriber for FallbackEngine<R> {
    async fn transcribe_chunk(&self, chunk_path: &Path) -> Result<TranscriptionOutput> {
        FallbackEngine::transcribe_chunk(self, chunk_path).await
    }
}

/// Builds the engines a job runs with. The default provider wires the
/// HTTP transport and the whisper.cpp recognizer; tests substitute
/// scripted engines.
pub trait EngineProvider: Send + Sync {
    fn remote(&self, config: &RemoteConfig, api_key: &str) -> Result<Arc<dyn ChunkTranscriber>>;
    fn fallback(&self, config: &FallbackConfig) -> Result<Arc<dyn ChunkTranscriber>>;
}

pub struct DefaultEngineProvider;

impl EngineProvider for DefaultEngineProvider {
    fn remote(&self, config: &RemoteConfig, api_key: &str) -> Result<Arc<dyn ChunkTranscriber>> {
        let transport = HttpTransport::new(config, api_key)?;
        Ok(Arc::new(RemoteEngine::new(transport, config.clone())))
    }

    fn fallback(&self, config: &FallbackConfig) -> Result<Arc<dyn ChunkTranscriber>> {
        let recognizer = WhisperCliRecognizer::new(config)?;
        Ok(Arc::new(FallbackEngine::new(recognizer, config.clone())))
    }
}
