//! Job and chunk store
//!
//! Owns the `jobs`/`chunks` tables and the filesystem tree
//! `<root>/jobs/<jobId>/{source,chunks,checkpoints}`. Deleting a job
//! cascades to its directory. Every mutation touches `updated_at`.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::storage::{Database, MigrationManager};
use crate::types::{
    ChunkRecord, ChunkStatus, EngineKind, JobRecord, JobResult, JobStatus, RawSegment, Segment,
    SpeakerRoleConfig,
};

/// Database file name under the store root.
const DB_FILE: &str = "jobs.sqlite";

pub struct JobStore {
    db: Database,
    root: PathBuf,
}

impl JobStore {
    /// Opens (and migrates) the store rooted at `root`, typically
    /// `<appData>/<AppName>/`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join("jobs"))
            .await
            .with_context(|| format!("Failed to create store root at {}", root.display()))?;

        let db = Database::new(root.join(DB_FILE)).await?;
        MigrationManager::new(db.clone()).migrate_up().await?;

        Ok(Self { db, root })
    }

    /// Opens the store in the platform application-data directory.
    pub async fn open_default(app_name: &str) -> Result<Self> {
        let base = dirs::data_dir().context("No application data directory on this platform")?;
        Self::open(base.join(app_name)).await
    }

    // --- filesystem layout -------------------------------------------------

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join("jobs").join(job_id.to_string())
    }

    pub fn source_dir(&self, job_id: Uuid) -> PathBuf {
        self.job_dir(job_id).join("source")
    }

    pub fn chunks_dir(&self, job_id: Uuid) -> PathBuf {
        self.job_dir(job_id).join("chunks")
    }

    pub fn checkpoints_dir(&self, job_id: Uuid) -> PathBuf {
        self.job_dir(job_id).join("checkpoints")
    }

    /// Copies the user's file into the job directory as
    /// `source/source-audio[.ext]` and returns the copied path. The copy is
    /// what the pipeline works from, so deleting the original cannot
    /// invalidate a resumable job.
    pub async fn import_source(&self, job_id: Uuid, original: &Path) -> Result<PathBuf> {
        let dir = self.source_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::create_dir_all(self.chunks_dir(job_id)).await?;
        tokio::fs::create_dir_all(self.checkpoints_dir(job_id)).await?;

        let file_name = match original.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("source-audio.{}", ext.to_ascii_lowercase()),
            None => "source-audio".to_string(),
        };
        let dest = dir.join(file_name);
        tokio::fs::copy(original, &dest)
            .await
            .with_context(|| format!("Failed to copy {} into job directory", original.display()))?;
        Ok(dest)
    }

    // --- job operations ----------------------------------------------------

    /// Inserts a new queued job row. The coordinator generates the id so
    /// the job directory can be populated before the row exists.
    pub async fn create_job(
        &self,
        id: Uuid,
        source_path: &Path,
        source_name: &str,
        source_hash: &str,
        roles: SpeakerRoleConfig,
    ) -> Result<JobRecord> {
        let now = Utc::now();
        let source_path = source_path.to_string_lossy().to_string();
        let source_name = source_name.to_string();
        let source_hash = source_hash.to_string();

        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO jobs (id, source_path, source_name, source_hash, status,
                                       created_at, updated_at, chunks_total, chunks_done,
                                       interviewer_count, participant_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, ?8, ?9)",
                    params![
                        id.to_string(),
                        source_path,
                        source_name,
                        source_hash,
                        JobStatus::Queued.as_str(),
                        now.to_rfc3339(),
                        now.to_rfc3339(),
                        roles.interviewers,
                        roles.participants,
                    ],
                )
                .context("Failed to insert job row")?;
                Ok(())
            })
            .await?;

        self.get_job(id)
            .await?
            .context("Job row missing immediately after insert")
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        self.db
            .with_connection(move |conn| {
                conn.query_row(
                    &format!("{} WHERE id = ?1", SELECT_JOB),
                    params![job_id.to_string()],
                    map_job_row,
                )
                .optional()
                .context("Failed to read job row")
            })
            .await
    }

    /// Most recently updated job that has not reached a terminal state.
    pub async fn latest_incomplete_job(&self) -> Result<Option<JobRecord>> {
        self.db
            .with_connection(|conn| {
                conn.query_row(
                    &format!(
                        "{} WHERE status NOT IN ('ready', 'failed')
                         ORDER BY updated_at DESC LIMIT 1",
                        SELECT_JOB
                    ),
                    [],
                    map_job_row,
                )
                .optional()
                .context("Failed to query latest incomplete job")
            })
            .await
    }

    /// Like [`latest_incomplete_job`], minus jobs paused behind the remote
    /// quality gate (those need an explicit operator retry).
    ///
    /// [`latest_incomplete_job`]: Self::latest_incomplete_job
    pub async fn latest_auto_resumable_job(&self) -> Result<Option<JobRecord>> {
        self.db
            .with_connection(|conn| {
                conn.query_row(
                    &format!(
                        "{} WHERE status NOT IN ('ready', 'failed', 'pausedRetryRemote')
                         ORDER BY updated_at DESC LIMIT 1",
                        SELECT_JOB
                    ),
                    [],
                    map_job_row,
                )
                .optional()
                .context("Failed to query latest auto-resumable job")
            })
            .await
    }

    pub async fn list_ready_jobs(&self, limit: u32) -> Result<Vec<JobRecord>> {
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE status = 'ready' ORDER BY updated_at DESC LIMIT ?1",
                    SELECT_JOB
                ))?;
                let rows = stmt
                    .query_map(params![limit], map_job_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Updates the job status. Moving to `ready` clears any stored error;
    /// moving to `failed` persists the supplied message.
    pub async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .db
            .with_connection(move |conn| {
                let affected = match status {
                    JobStatus::Ready => conn.execute(
                        "UPDATE jobs SET status = ?1, error_message = NULL, updated_at = ?2
                         WHERE id = ?3",
                        params![status.as_str(), now, job_id.to_string()],
                    )?,
                    _ => conn.execute(
                        "UPDATE jobs SET status = ?1, error_message = ?2, updated_at = ?3
                         WHERE id = ?4",
                        params![status.as_str(), error_message, now, job_id.to_string()],
                    )?,
                };
                Ok(affected)
            })
            .await?;

        if affected == 0 {
            bail!("No job row for {job_id}");
        }
        Ok(())
    }

    pub async fn update_job_metadata(
        &self,
        job_id: Uuid,
        duration_sec: f64,
        chunks_total: u32,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "UPDATE jobs SET duration_sec = ?1, chunks_total = ?2, updated_at = ?3
                     WHERE id = ?4",
                    params![duration_sec, chunks_total, now, job_id.to_string()],
                )
                .context("Failed to update job metadata")?;
                Ok(())
            })
            .await
    }

    /// Recomputes `chunks_done` from chunk rows. Count-from-truth keeps the
    /// counter correct across resumes.
    pub async fn refresh_chunks_done(&self, job_id: Uuid) -> Result<u32> {
        let now = Utc::now().to_rfc3339();
        self.db
            .with_connection(move |conn| {
                let done: u32 = conn.query_row(
                    "SELECT COUNT(*) FROM chunks WHERE job_id = ?1 AND status = 'done'",
                    params![job_id.to_string()],
                    |row| row.get(0),
                )?;
                conn.execute(
                    "UPDATE jobs SET chunks_done = ?1, updated_at = ?2 WHERE id = ?3",
                    params![done, now, job_id.to_string()],
                )?;
                Ok(done)
            })
            .await
    }

    /// Renames a finished job's display title (used after the shell's
    /// filename suggestion step).
    pub async fn update_ready_job_source_name(&self, job_id: Uuid, name: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let name = name.to_string();
        let affected = self
            .db
            .with_connection(move |conn| {
                Ok(conn.execute(
                    "UPDATE jobs SET source_name = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = 'ready'",
                    params![name, now, job_id.to_string()],
                )?)
            })
            .await?;

        if affected == 0 {
            bail!("No ready job row for {job_id}");
        }
        Ok(())
    }

    pub async fn set_final_transcript(
        &self,
        job_id: Uuid,
        transcript: &[Segment],
        status: JobStatus,
    ) -> Result<()> {
        let json = serde_json::to_string(transcript)?;
        let now = Utc::now().to_rfc3339();
        self.db
            .with_connection(move |conn| {
                let affected = match status {
                    JobStatus::Ready => conn.execute(
                        "UPDATE jobs SET transcript_json = ?1, status = ?2,
                                         error_message = NULL, updated_at = ?3
                         WHERE id = ?4",
                        params![json, status.as_str(), now, job_id.to_string()],
                    )?,
                    _ => conn.execute(
                        "UPDATE jobs SET transcript_json = ?1, status = ?2, updated_at = ?3
                         WHERE id = ?4",
                        params![json, status.as_str(), now, job_id.to_string()],
                    )?,
                };
                if affected == 0 {
                    bail!("No job row for {job_id}");
                }
                Ok(())
            })
            .await
    }

    /// Flips I↔D on every final segment and stores the result. Calling it
    /// twice restores the original transcript.
    pub async fn toggle_swap_roles(&self, job_id: Uuid) -> Result<Vec<Segment>> {
        let job = self
            .get_job(job_id)
            .await?
            .with_context(|| format!("No job row for {job_id}"))?;
        let mut transcript = job
            .transcript
            .context("Job has no final transcript to swap")?;

        for segment in &mut transcript {
            segment.speaker = segment.speaker.flipped();
        }

        let json = serde_json::to_string(&transcript)?;
        let now = Utc::now().to_rfc3339();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "UPDATE jobs SET transcript_json = ?1, updated_at = ?2 WHERE id = ?3",
                    params![json, now, job_id.to_string()],
                )?;
                Ok(())
            })
            .await?;

        Ok(transcript)
    }

    pub async fn read_job_result(&self, job_id: Uuid) -> Result<Option<JobResult>> {
        Ok(self.get_job(job_id).await?.map(job_to_result))
    }

    pub async fn latest_ready_result(&self) -> Result<Option<JobResult>> {
        let jobs = self.list_ready_jobs(1).await?;
        Ok(jobs.into_iter().next().map(job_to_result))
    }

    /// Deletes a ready job and its directory tree.
    pub async fn delete_ready_job(&self, job_id: Uuid) -> Result<()> {
        let affected = self
            .db
            .with_connection(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM jobs WHERE id = ?1 AND status = 'ready'",
                    params![job_id.to_string()],
                )?)
            })
            .await?;

        if affected == 0 {
            bail!("No ready job row for {job_id}");
        }
        remove_dir_if_present(&self.job_dir(job_id)).await
    }

    pub async fn delete_all_ready_jobs(&self) -> Result<u32> {
        let ids: Vec<Uuid> = self
            .db
            .with_connection(|conn| {
                let mut stmt = conn.prepare("SELECT id FROM jobs WHERE status = 'ready'")?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
                    .into_iter()
                    .filter_map(|s| Uuid::parse_str(&s).ok())
                    .collect();
                conn.execute("DELETE FROM jobs WHERE status = 'ready'", [])?;
                Ok(ids)
            })
            .await?;

        for id in &ids {
            remove_dir_if_present(&self.job_dir(*id)).await?;
        }
        Ok(ids.len() as u32)
    }

    /// Drops every row and the whole jobs directory.
    pub async fn clear_all_data(&self) -> Result<()> {
        self.db
            .with_connection(|conn| {
                conn.execute("DELETE FROM chunks", [])?;
                conn.execute("DELETE FROM jobs", [])?;
                Ok(())
            })
            .await?;

        remove_dir_if_present(&self.root.join("jobs")).await?;
        tokio::fs::create_dir_all(self.root.join("jobs")).await?;
        Ok(())
    }

    /// Removes job directories that belong to terminal `ready` rows or to
    /// no row at all. Called at the start of a fresh (non-resume) run.
    pub async fn purge_orphan_directories(&self) -> Result<u32> {
        let keep: Vec<String> = self
            .db
            .with_connection(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id FROM jobs WHERE status NOT IN ('ready', 'failed')")?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await?;

        let jobs_root = self.root.join("jobs");
        let mut removed = 0u32;
        let mut entries = match tokio::fs::read_dir(&jobs_root).await {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !keep.contains(&name) {
                remove_dir_if_present(&entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("Purged {removed} orphan job directories");
        }
        Ok(removed)
    }

    // --- chunk operations --------------------------------------------------

    /// Full-row replace keyed on `(job_id, idx)`. Unspecified fields are
    /// whatever the caller's record carries, so re-upserting after a retry
    /// overwrites the previous outcome.
    pub async fn upsert_chunk(&self, record: &ChunkRecord) -> Result<()> {
        let transcript_json = match &record.transcript {
            Some(segments) => Some(serde_json::to_string(segments)?),
            None => None,
        };
        let record = record.clone();
        let now = Utc::now().to_rfc3339();

        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO chunks
                     (job_id, idx, start_sec, end_sec, chunk_path, chunk_hash, status,
                      engine, attempt_count, transcript_json, confidence, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        record.job_id.to_string(),
                        record.index,
                        record.start_sec,
                        record.end_sec,
                        record.chunk_path,
                        record.chunk_hash,
                        record.status.as_str(),
                        record.engine.map(|e| e.as_str()),
                        record.attempt_count,
                        transcript_json,
                        record.confidence,
                        now,
                    ],
                )
                .context("Failed to upsert chunk row")?;
                Ok(())
            })
            .await
    }

    pub async fn list_chunks(&self, job_id: Uuid) -> Result<Vec<ChunkRecord>> {
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT job_id, idx, start_sec, end_sec, chunk_path, chunk_hash, status,
                            engine, attempt_count, transcript_json, confidence, updated_at
                     FROM chunks WHERE job_id = ?1 ORDER BY idx ASC",
                )?;
                let rows = stmt
                    .query_map(params![job_id.to_string()], map_chunk_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    // --- checkpoints -------------------------------------------------------

    /// Writes `<checkpoints>/<name>.json` atomically (temp file + rename)
    /// as pretty-printed JSON with sorted keys.
    pub async fn write_checkpoint<T: serde::Serialize>(
        &self,
        job_id: Uuid,
        name: &str,
        payload: &T,
    ) -> Result<PathBuf> {
        let dir = self.checkpoints_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;

        // Round-trip through Value: serde_json's default map is ordered, so
        // the output keys come out sorted regardless of struct field order.
        let value = serde_json::to_value(payload)?;
        let pretty = serde_json::to_string_pretty(&value)?;

        let final_path = dir.join(format!("{name}.json"));
        let tmp_path = dir.join(format!(".{name}.json.tmp"));
        tokio::fs::write(&tmp_path, pretty.as_bytes())
            .await
            .with_context(|| format!("Failed to write checkpoint {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .with_context(|| format!("Failed to move checkpoint into {}", final_path.display()))?;
        Ok(final_path)
    }
}

/// Checkpoint payload written after each chunk completes.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkCheckpoint {
    pub job_id: Uuid,
    pub chunk_index: u32,
    pub engine: EngineKind,
    pub segments: Vec<RawSegment>,
}

/// Checkpoint payload written when the merged result is stored.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultCheckpoint {
    pub job_id: Uuid,
    pub source_path: String,
    pub duration_sec: f64,
    pub transcript: Vec<Segment>,
}

const SELECT_JOB: &str = "SELECT id, source_path, source_name, source_hash, status, created_at,
        updated_at, duration_sec, chunks_total, chunks_done, transcript_json, error_message,
        interviewer_count, participant_count FROM jobs";

fn map_job_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let id: String = row.get(0)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    let transcript_json: Option<String> = row.get(10)?;

    Ok(JobRecord {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        source_path: row.get(1)?,
        source_name: row.get(2)?,
        source_hash: row.get(3)?,
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        duration_sec: row.get(7)?,
        chunks_total: row.get(8)?,
        chunks_done: row.get(9)?,
        transcript: transcript_json.and_then(|json| serde_json::from_str(&json).ok()),
        error_message: row.get(11)?,
        interviewer_count: row.get(12)?,
        participant_count: row.get(13)?,
    })
}

fn map_chunk_row(row: &Row<'_>) -> rusqlite::Result<ChunkRecord> {
    let job_id: String = row.get(0)?;
    let status: String = row.get(6)?;
    let engine: Option<String> = row.get(7)?;
    let transcript_json: Option<String> = row.get(9)?;
    let updated_at: String = row.get(11)?;

    Ok(ChunkRecord {
        job_id: Uuid::parse_str(&job_id).unwrap_or_default(),
        index: row.get(1)?,
        start_sec: row.get(2)?,
        end_sec: row.get(3)?,
        chunk_path: row.get(4)?,
        chunk_hash: row.get(5)?,
        status: ChunkStatus::parse(&status).unwrap_or(ChunkStatus::Failed),
        engine: engine.as_deref().and_then(EngineKind::parse),
        attempt_count: row.get(8)?,
        transcript: transcript_json.and_then(|json| serde_json::from_str(&json).ok()),
        confidence: row.get(10)?,
        updated_at: parse_timestamp(&updated_at),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn job_to_result(job: JobRecord) -> JobResult {
    JobResult {
        job_id: job.id,
        source_name: job.source_name,
        status: job.status,
        duration_sec: job.duration_sec,
        transcript: job.transcript.unwrap_or_default(),
        error_message: job.error_message,
    }
}

async fn remove_dir_if_present(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", dir.display())),
    }
}
