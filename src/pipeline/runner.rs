//! Job runner
//!
//! Executes one job end to end: preprocessing (chunk plan + render),
//! the per-chunk engine ladder (remote, then fallback, then pause or
//! fail), and the final merge. Chunks run strictly in ascending index
//! order; every completion is checkpointed before the next chunk starts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::media::chunker::ChunkPlan;
use crate::media::{Chunker, MediaBackend};
use crate::merge::MergeEngine;
use crate::pipeline::ChunkTranscriber;
use crate::storage::job_store::{ChunkCheckpoint, ResultCheckpoint};
use crate::storage::JobStore;
use crate::types::{
    ChunkRecord, ChunkStatus, EngineKind, JobStatus, ProgressEvent, ProgressStage, RawSegment,
    SpeakerRoleConfig, TranscriptionOutput,
};

/// Percent span reserved for the chunk phase: 10 at the first chunk,
/// 90 when the last one lands.
const CHUNK_PHASE_BASE_PERCENT: f64 = 10.0;
const CHUNK_PHASE_SPAN_PERCENT: f64 = 80.0;

pub struct RunnerEngines {
    pub remote: Option<Arc<dyn ChunkTranscriber>>,
    pub fallback: Option<Arc<dyn ChunkTranscriber>>,
}

pub struct JobRunner {
    pub store: Arc<JobStore>,
    pub config: PipelineConfig,
    pub media: Arc<dyn MediaBackend>,
    pub engines: RunnerEngines,
    pub progress_tx: broadcast::Sender<ProgressEvent>,
    pub job_id: Uuid,
    pub roles: SpeakerRoleConfig,
    pub resume: bool,
}

/// Why the chunk loop stopped early.
enum ChunkLoopExit {
    Paused,
    Failed(String),
}

impl JobRunner {
    pub async fn run(self) {
        if let Err(exit) = self.run_inner().await {
            match exit {
                ChunkLoopExit::Paused => {
                    info!("Job {} paused for remote retry", self.job_id);
                }
                ChunkLoopExit::Failed(message) => {
                    error!("Job {} failed: {message}", self.job_id);
                }
            }
        }
    }

    async fn run_inner(&self) -> Result<(), ChunkLoopExit> {
        let job = match self.store.get_job(self.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                return Err(self
                    .fail_job(format!("Jobbet {} findes ikke", self.job_id))
                    .await)
            }
            Err(e) => return Err(self.fail_job(e.to_string()).await),
        };

        // 1. Source must still be on disk
        let source = PathBuf::from(&job.source_path);
        if !source.exists() {
            let message = PipelineError::SourceMissing {
                path: source.clone(),
            }
            .to_string();
            return Err(self.fail_job(message).await);
        }

        // 2. Fresh runs clean up directories left behind by finished jobs
        if !self.resume {
            if let Err(e) = self.store.purge_orphan_directories().await {
                warn!("Orphan purge failed: {e}");
            }
        }

        // 3. Preprocessing: plan + render chunks, or recover existing rows
        self.set_status(JobStatus::Preprocessing, None).await;
        self.emit(
            JobStatus::Preprocessing,
            ProgressStage::Preprocess,
            5.0,
            None,
            0,
            job.chunks_total,
            "Forbereder lydfilen".to_string(),
        );

        let chunks = match self.ensure_chunks(&source).await {
            Ok(chunks) => chunks,
            Err(e) => return Err(self.fail_job(e.to_string()).await),
        };
        let total = chunks.len() as u32;

        let transcribing_status = if self.engines.remote.is_some() {
            JobStatus::TranscribingRemote
        } else {
            JobStatus::TranscribingFallback
        };
        self.set_status(transcribing_status, None).await;

        // 4. Chunk ladder, ascending index order
        let started = Instant::now();
        let mut processed_this_run = 0u32;
        let mut done = chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Done)
            .count() as u32;

        for chunk in &chunks {
            if chunk.status == ChunkStatus::Done {
                continue;
            }
            self.emit(
                transcribing_status,
                ProgressStage::Transcribe,
                chunk_percent(done, total),
                eta_seconds(&started, processed_this_run, done, total),
                done,
                total,
                format!("Transskriberer del {} af {}", chunk.index + 1, total),
            );

            self.process_chunk(&source, chunk, total).await?;

            processed_this_run += 1;
            done = self
                .store
                .refresh_chunks_done(self.job_id)
                .await
                .unwrap_or(done + 1);

            self.emit(
                transcribing_status,
                ProgressStage::Transcribe,
                chunk_percent(done, total),
                eta_seconds(&started, processed_this_run, done, total),
                done,
                total,
                format!("Del {} af {} er færdig", done, total),
            );
        }

        // 5. Merge and finish
        self.set_status(JobStatus::Merging, None).await;
        self.emit(
            JobStatus::Merging,
            ProgressStage::Merge,
            92.0,
            None,
            done,
            total,
            "Fletter transskriptionen".to_string(),
        );

        match self.merge_and_store(&source).await {
            Ok(()) => {
                self.emit(
                    JobStatus::Ready,
                    ProgressStage::Merge,
                    100.0,
                    Some(0.0),
                    total,
                    total,
                    "Transskriptionen er klar".to_string(),
                );
                info!("Job {} is ready", self.job_id);
                Ok(())
            }
            Err(e) => Err(self.fail_job(e.to_string()).await),
        }
    }

    /// Loads existing chunk rows or builds them from a fresh chunk plan.
    /// Recovers a missing duration via the probe so resumed jobs keep
    /// correct metadata.
    async fn ensure_chunks(&self, source: &Path) -> anyhow::Result<Vec<ChunkRecord>> {
        let existing = self.store.list_chunks(self.job_id).await?;
        if !existing.is_empty() {
            let job = self
                .store
                .get_job(self.job_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("job row disappeared"))?;
            if job.duration_sec.is_none() {
                let duration = self.media.probe_duration(source).await?;
                self.store
                    .update_job_metadata(self.job_id, duration, existing.len() as u32)
                    .await?;
            }
            return Ok(existing);
        }

        let chunks_dir = self.store.chunks_dir(self.job_id);
        tokio::fs::create_dir_all(&chunks_dir).await?;

        let chunker = Chunker::new(self.media.as_ref(), self.config.chunking.clone());
        let (duration, rendered) = chunker.create_chunks(source, &chunks_dir).await?;
        self.store
            .update_job_metadata(self.job_id, duration, rendered.len() as u32)
            .await?;

        let mut records = Vec::with_capacity(rendered.len());
        for (plan, hash) in rendered {
            let record = ChunkRecord {
                job_id: self.job_id,
                index: plan.index,
                start_sec: plan.start_sec,
                end_sec: plan.end_sec,
                chunk_path: chunks_dir.join(&plan.file_name).to_string_lossy().to_string(),
                chunk_hash: Some(hash),
                status: ChunkStatus::Queued,
                engine: None,
                attempt_count: 0,
                transcript: None,
                confidence: None,
                updated_at: chrono::Utc::now(),
            };
            self.store.upsert_chunk(&record).await?;
            records.push(record);
        }
        Ok(records)
    }

    /// The per-chunk engine ladder. Remote first (when enabled), fallback
    /// second; the quality-gate pause and terminal failures bubble out as
    /// [`ChunkLoopExit`].
    async fn process_chunk(
        &self,
        source: &Path,
        chunk: &ChunkRecord,
        total: u32,
    ) -> Result<(), ChunkLoopExit> {
        let mut record = chunk.clone();
        let chunk_path = PathBuf::from(&record.chunk_path);

        // Re-render is idempotent by path; a crashed run may have lost the file
        if !chunk_path.exists() {
            let chunker = Chunker::new(self.media.as_ref(), self.config.chunking.clone());
            let plan = ChunkPlan {
                index: record.index,
                start_sec: record.start_sec,
                end_sec: record.end_sec,
                file_name: chunk_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            };
            match chunker.render(source, &chunk_path, &plan).await {
                Ok(hash) => record.chunk_hash = Some(hash),
                Err(e) => return Err(self.fail_job(e.to_string()).await),
            }
        }

        // Remote attempt
        if let Some(remote) = &self.engines.remote {
            record.status = ChunkStatus::TranscribingRemote;
            record.engine = Some(EngineKind::Remote);
            record.attempt_count += 1;
            let _ = self.store.upsert_chunk(&record).await;

            match remote.transcribe_chunk(&chunk_path).await {
                Ok(output) => {
                    self.complete_chunk(record, output, EngineKind::Remote).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Remote engine failed on chunk {} of job {}: {e}",
                        record.index, self.job_id
                    );
                }
            }
        }

        // Fallback attempt
        record.status = ChunkStatus::TranscribingFallback;
        record.engine = Some(EngineKind::Fallback);
        record.attempt_count += 1;
        let _ = self.store.upsert_chunk(&record).await;

        let fallback_result = match &self.engines.fallback {
            Some(fallback) => fallback.transcribe_chunk(&chunk_path).await,
            None => Err(PipelineError::FallbackUnavailable {
                message: "den lokale transskribering er ikke konfigureret".to_string(),
            }),
        };

        match fallback_result {
            Ok(output) => {
                self.complete_chunk(record, output, EngineKind::Fallback).await;
                Ok(())
            }
            Err(e) if e.is_low_confidence() && self.engines.remote.is_some() => {
                // Pause, not failure: the operator retries once the remote
                // API is reachable again
                record.status = ChunkStatus::PausedRetryRemote;
                let _ = self.store.upsert_chunk(&record).await;
                self.set_status(JobStatus::PausedRetryRemote, Some(e.to_string()))
                    .await;
                self.emit(
                    JobStatus::PausedRetryRemote,
                    ProgressStage::Transcribe,
                    chunk_percent(record.index, total),
                    None,
                    record.index,
                    total,
                    "Sat på pause: prøv igen når forbindelsen er tilbage".to_string(),
                );
                Err(ChunkLoopExit::Paused)
            }
            Err(e) => {
                record.status = ChunkStatus::Failed;
                let _ = self.store.upsert_chunk(&record).await;
                Err(self.fail_job(e.to_string()).await)
            }
        }
    }

    /// Globalizes times, stores the chunk row, and writes its checkpoint.
    async fn complete_chunk(
        &self,
        mut record: ChunkRecord,
        output: TranscriptionOutput,
        engine: EngineKind,
    ) {
        let segments: Vec<RawSegment> = output
            .segments
            .into_iter()
            .map(|s| s.globalized(record.start_sec))
            .collect();

        record.status = ChunkStatus::Done;
        record.engine = Some(engine);
        record.confidence = output.average_confidence;
        record.transcript = Some(segments.clone());
        if let Err(e) = self.store.upsert_chunk(&record).await {
            warn!("Failed to store chunk {}: {e}", record.index);
        }

        // Checkpoint strictly after the store update
        let checkpoint = ChunkCheckpoint {
            job_id: self.job_id,
            chunk_index: record.index,
            engine,
            segments,
        };
        if let Err(e) = self
            .store
            .write_checkpoint(self.job_id, &format!("chunk_{:04}", record.index), &checkpoint)
            .await
        {
            warn!("Failed to write chunk checkpoint: {e}");
        }
    }

    async fn merge_and_store(&self, source: &Path) -> anyhow::Result<()> {
        let chunks = self.store.list_chunks(self.job_id).await?;
        let mut segments: Vec<RawSegment> = Vec::new();
        for chunk in &chunks {
            if let Some(transcript) = &chunk.transcript {
                segments.extend(transcript.iter().cloned());
            }
        }

        let transcript = MergeEngine::new().merge(segments, self.roles);
        if transcript.is_empty() {
            anyhow::bail!("Transskriptionen blev tom efter fletning");
        }

        self.store
            .set_final_transcript(self.job_id, &transcript, JobStatus::Ready)
            .await?;

        let duration = self
            .store
            .get_job(self.job_id)
            .await?
            .and_then(|j| j.duration_sec)
            .unwrap_or(0.0);
        let checkpoint = ResultCheckpoint {
            job_id: self.job_id,
            source_path: source.to_string_lossy().to_string(),
            duration_sec: duration,
            transcript,
        };
        self.store
            .write_checkpoint(self.job_id, "result", &checkpoint)
            .await?;
        Ok(())
    }

    async fn chunk_total(&self) -> u32 {
        self.store
            .get_job(self.job_id)
            .await
            .ok()
            .flatten()
            .map(|j| j.chunks_total)
            .unwrap_or(0)
    }

    async fn set_status(&self, status: JobStatus, message: Option<String>) {
        if let Err(e) = self
            .store
            .update_job_status(self.job_id, status, message)
            .await
        {
            warn!("Failed to update job status: {e}");
        }
    }

    /// Marks the job failed, persists the message, and emits the final
    /// progress event carrying the same text.
    async fn fail_job(&self, message: String) -> ChunkLoopExit {
        self.set_status(JobStatus::Failed, Some(message.clone()))
            .await;
        let total = self.chunk_total().await;
        self.emit(
            JobStatus::Failed,
            ProgressStage::Transcribe,
            0.0,
            None,
            0,
            total,
            message.clone(),
        );
        ChunkLoopExit::Failed(message)
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        status: JobStatus,
        stage: ProgressStage,
        percent: f64,
        eta_seconds: Option<f64>,
        chunks_done: u32,
        chunks_total: u32,
        message: String,
    ) {
        let event = ProgressEvent {
            job_id: self.job_id,
            status,
            stage,
            percent: percent.clamp(0.0, 100.0),
            eta_seconds,
            chunks_done,
            chunks_total,
            message,
        };
        // Send fails only when nobody subscribes, which is fine
        let _ = self.progress_tx.send(event);
    }
}

fn chunk_percent(done: u32, total: u32) -> f64 {
    if total == 0 {
        return CHUNK_PHASE_BASE_PERCENT;
    }
    (CHUNK_PHASE_BASE_PERCENT + CHUNK_PHASE_SPAN_PERCENT * done as f64 / total as f64)
        .clamp(0.0, 100.0)
}

fn eta_seconds(started: &Instant, processed: u32, done: u32, total: u32) -> Option<f64> {
    if processed == 0 || total <= done {
        return None;
    }
    let avg = started.elapsed().as_secs_f64() / processed as f64;
    Some(avg * (total - done) as f64)
}
