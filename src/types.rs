//! Core domain types for the transcription pipeline
//!
//! Jobs, chunks, segments, and progress events shared across the storage,
//! engine, merge, and export layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rounds a time value to millisecond precision. All persisted segment and
/// chunk boundaries go through this so stored JSON compares bit-stably.
pub fn round_ms(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

/// Final two-valued speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Interviewer
    I,
    /// Deltager (participant)
    D,
}

impl Role {
    pub fn flipped(self) -> Self {
        match self {
            Role::I => Role::D,
            Role::D => Role::I,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::I => "I",
            Role::D => "D",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-chunk transcription fragment before merging. Times are chunk-local
/// at transcription time and globalized (`+ chunk.start_sec`) before they
/// are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    pub start_sec: f64,
    pub end_sec: f64,
    /// Opaque internal speaker identity, e.g. `speaker_0`.
    pub speaker_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl RawSegment {
    pub fn new(
        start_sec: f64,
        end_sec: f64,
        speaker_id: impl Into<String>,
        text: impl Into<String>,
        confidence: Option<f64>,
    ) -> Self {
        Self {
            start_sec,
            end_sec,
            speaker_id: speaker_id.into(),
            text: text.into(),
            confidence,
        }
    }

    /// Shifts the segment into the global time base of its parent chunk.
    pub fn globalized(mut self, chunk_start_sec: f64) -> Self {
        self.start_sec = round_ms(self.start_sec + chunk_start_sec);
        self.end_sec = round_ms(self.end_sec + chunk_start_sec);
        self
    }
}

/// Post-merge, role-labeled transcript entry. Times are global, rounded
/// to milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub speaker: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// How many people filled each role during the interview. Drives the
/// interviewer slot count in role assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerRoleConfig {
    pub interviewers: u32,
    pub participants: u32,
}

impl Default for SpeakerRoleConfig {
    fn default() -> Self {
        Self {
            interviewers: 1,
            participants: 1,
        }
    }
}

impl SpeakerRoleConfig {
    pub fn new(interviewers: u32, participants: u32) -> Self {
        Self {
            interviewers: interviewers.max(1),
            participants: participants.max(1),
        }
    }
}

/// Job lifecycle states. `Ready` and `Failed` are terminal;
/// `PausedRetryRemote` is resumable by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Queued,
    Preprocessing,
    TranscribingRemote,
    TranscribingFallback,
    Merging,
    Ready,
    PausedRetryRemote,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Preprocessing => "preprocessing",
            JobStatus::TranscribingRemote => "transcribingRemote",
            JobStatus::TranscribingFallback => "transcribingFallback",
            JobStatus::Merging => "merging",
            JobStatus::Ready => "ready",
            JobStatus::PausedRetryRemote => "pausedRetryRemote",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "queued" => JobStatus::Queued,
            "preprocessing" => JobStatus::Preprocessing,
            "transcribingRemote" => JobStatus::TranscribingRemote,
            "transcribingFallback" => JobStatus::TranscribingFallback,
            "merging" => JobStatus::Merging,
            "ready" => JobStatus::Ready,
            "pausedRetryRemote" => JobStatus::PausedRetryRemote,
            "failed" => JobStatus::Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Failed)
    }
}

/// Per-chunk processing states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChunkStatus {
    Queued,
    TranscribingRemote,
    TranscribingFallback,
    Done,
    PausedRetryRemote,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkStatus::Queued => "queued",
            ChunkStatus::TranscribingRemote => "transcribingRemote",
            ChunkStatus::TranscribingFallback => "transcribingFallback",
            ChunkStatus::Done => "done",
            ChunkStatus::PausedRetryRemote => "pausedRetryRemote",
            ChunkStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "queued" => ChunkStatus::Queued,
            "transcribingRemote" => ChunkStatus::TranscribingRemote,
            "transcribingFallback" => ChunkStatus::TranscribingFallback,
            "done" => ChunkStatus::Done,
            "pausedRetryRemote" => ChunkStatus::PausedRetryRemote,
            "failed" => ChunkStatus::Failed,
            _ => return None,
        })
    }
}

/// Which engine produced a chunk's transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Remote,
    Fallback,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Remote => "remote",
            EngineKind::Fallback => "fallback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "remote" => Some(EngineKind::Remote),
            "fallback" => Some(EngineKind::Fallback),
            _ => None,
        }
    }
}

/// One row of the `jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    /// Path inside the job directory, not the original user path.
    pub source_path: String,
    /// Display title.
    pub source_name: String,
    /// Content hash of the original file.
    pub source_hash: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub duration_sec: Option<f64>,
    pub chunks_total: u32,
    pub chunks_done: u32,
    /// Final transcript, present once the job is ready.
    pub transcript: Option<Vec<Segment>>,
    pub error_message: Option<String>,
    pub interviewer_count: u32,
    pub participant_count: u32,
}

impl JobRecord {
    pub fn role_config(&self) -> SpeakerRoleConfig {
        SpeakerRoleConfig::new(self.interviewer_count, self.participant_count)
    }
}

/// One row of the `chunks` table. Identity is `(job_id, index)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub job_id: Uuid,
    pub index: u32,
    pub start_sec: f64,
    pub end_sec: f64,
    pub chunk_path: String,
    pub chunk_hash: Option<String>,
    pub status: ChunkStatus,
    pub engine: Option<EngineKind>,
    pub attempt_count: u32,
    /// Globalized raw segments once the chunk is done.
    pub transcript: Option<Vec<RawSegment>>,
    pub confidence: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// A read-only view of a finished (or failed) job for the shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub source_name: String,
    pub status: JobStatus,
    pub duration_sec: Option<f64>,
    pub transcript: Vec<Segment>,
    pub error_message: Option<String>,
}

/// Per-chunk engine output: ordered chunk-local raw segments plus the
/// average confidence across segments that carry a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionOutput {
    pub segments: Vec<RawSegment>,
    pub average_confidence: Option<f64>,
}

impl TranscriptionOutput {
    pub fn new(segments: Vec<RawSegment>) -> Self {
        let values: Vec<f64> = segments.iter().filter_map(|s| s.confidence).collect();
        let average_confidence = if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        };
        Self {
            segments,
            average_confidence,
        }
    }
}

/// Pipeline stage reported in progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Upload,
    Preprocess,
    Transcribe,
    Merge,
    Export,
}

/// Broadcast progress event. Emitted at every state change and after each
/// chunk completion; subscribers receive events in emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub stage: ProgressStage,
    /// 0..=100
    pub percent: f64,
    pub eta_seconds: Option<f64>,
    pub chunks_done: u32,
    pub chunks_total: u32,
    pub message: String,
}
