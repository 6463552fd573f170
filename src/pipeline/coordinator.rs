//! Job coordinator
//!
//! Holds the process-wide "one active job" invariant, the only store
//! handle, and the progress broadcast channel. Entry points fail fast
//! with [`PipelineError::Busy`] while a runner is live; file-system locks
//! are never relied on for this.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{is_supported_media, PipelineConfig};
use crate::editor;
use crate::error::{PipelineError, Result};
use crate::hashing;
use crate::media::MediaBackend;
use crate::pipeline::runner::{JobRunner, RunnerEngines};
use crate::pipeline::EngineProvider;
use crate::storage::JobStore;
use crate::types::{
    JobResult, JobStatus, ProgressEvent, ProgressStage, Segment, SpeakerRoleConfig,
};

/// Buffered progress events per subscriber before lagging kicks in.
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

pub struct Coordinator {
    store: Arc<JobStore>,
    config: PipelineConfig,
    media: Arc<dyn MediaBackend>,
    engines: Arc<dyn EngineProvider>,
    active: Arc<AtomicBool>,
    runner_handle: Mutex<Option<JoinHandle<()>>>,
    progress_tx: broadcast::Sender<ProgressEvent>,
}

impl Coordinator {
    pub fn new(
        store: JobStore,
        config: PipelineConfig,
        media: Arc<dyn MediaBackend>,
        engines: Arc<dyn EngineProvider>,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            store: Arc::new(store),
            config,
            media,
            engines,
            active: Arc::new(AtomicBool::new(false)),
            runner_handle: Mutex::new(None),
            progress_tx,
        }
    }

    /// Subscribes to progress events. Every subscriber receives events in
    /// emission order.
    pub fn progress_stream(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// Starts a new job for `source_path`. Refuses while another job is
    /// active; validates the media boundary and the API key before any
    /// state is created.
    pub async fn start_job(
        &self,
        source_path: &Path,
        api_key: Option<String>,
        use_remote: bool,
        roles: SpeakerRoleConfig,
    ) -> Result<Uuid> {
        let gate = self.acquire_gate()?;

        if !source_path.exists() {
            return Err(PipelineError::SourceMissing {
                path: source_path.to_path_buf(),
            });
        }
        if !is_supported_media(source_path) {
            return Err(PipelineError::parsing(format!(
                "Filtypen understøttes ikke: {}",
                source_path.display()
            )));
        }
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        if use_remote && api_key.is_none() {
            return Err(PipelineError::ApiKeyMissing);
        }

        let source_hash = hashing::hash_file(source_path).await?;
        let source_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "optagelse".to_string());

        let job_id = Uuid::new_v4();
        let imported = self.store.import_source(job_id, source_path).await?;
        self.store
            .create_job(job_id, &imported, &source_name, &source_hash, roles)
            .await?;
        info!("Created job {job_id} for {source_name}");

        let _ = self.progress_tx.send(ProgressEvent {
            job_id,
            status: JobStatus::Queued,
            stage: ProgressStage::Upload,
            percent: 0.0,
            eta_seconds: None,
            chunks_done: 0,
            chunks_total: 0,
            message: "Lydfilen er kopieret og sat i kø".to_string(),
        });

        self.spawn_runner(job_id, api_key, use_remote, roles, false, gate)
            .await;
        Ok(job_id)
    }

    /// Resumes the most recent auto-resumable job, if any. Jobs paused at
    /// the remote quality gate are excluded; the operator retries those
    /// explicitly once the API is reachable again.
    pub async fn resume_latest(&self, api_key: Option<String>) -> Result<Option<Uuid>> {
        let gate = self.acquire_gate()?;

        let Some(job) = self.store.latest_auto_resumable_job().await? else {
            return Ok(None);
        };

        let api_key = api_key.filter(|k| !k.trim().is_empty());
        let use_remote = api_key.is_some();
        let roles = job.role_config();
        info!("Resuming job {} ({})", job.id, job.status.as_str());

        self.spawn_runner(job.id, api_key, use_remote, roles, true, gate)
            .await;
        Ok(Some(job.id))
    }

    /// Retries a job paused behind the remote quality gate.
    pub async fn retry_paused(&self, job_id: Uuid, api_key: Option<String>) -> Result<Uuid> {
        let gate = self.acquire_gate()?;

        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::parsing(format!("Ukendt job: {job_id}")))?;

        let api_key = api_key.filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            return Err(PipelineError::ApiKeyMissing);
        }
        let roles = job.role_config();

        self.spawn_runner(job.id, api_key, true, roles, true, gate)
            .await;
        Ok(job.id)
    }

    /// Flips every final segment's role and stores the result.
    pub async fn swap_roles(&self, job_id: Uuid) -> Result<Vec<Segment>> {
        Ok(self.store.toggle_swap_roles(job_id).await?)
    }

    /// Parses `editor_text` against the job's current transcript and
    /// persists the result.
    pub async fn update_transcript(&self, job_id: Uuid, editor_text: &str) -> Result<Vec<Segment>> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::parsing(format!("Ukendt job: {job_id}")))?;

        let prior = job.transcript.unwrap_or_default();
        let parsed = editor::parse(editor_text, &prior)?;
        self.store
            .set_final_transcript(job_id, &parsed, job.status)
            .await?;
        Ok(parsed)
    }

    pub async fn job_result(&self, job_id: Uuid) -> Result<Option<JobResult>> {
        Ok(self.store.read_job_result(job_id).await?)
    }

    /// Read access for export paths and the shell.
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Awaits the current runner, if any. Test and shutdown helper; does
    /// not cancel the runner.
    pub async fn wait_for_runner(&self) {
        let handle = self.runner_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Runner task join error: {e}");
            }
        }
    }

    fn acquire_gate(&self) -> Result<ActiveGate> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PipelineError::Busy);
        }
        Ok(ActiveGate {
            flag: Arc::clone(&self.active),
        })
    }

    async fn spawn_runner(
        &self,
        job_id: Uuid,
        api_key: Option<String>,
        use_remote: bool,
        roles: SpeakerRoleConfig,
        resume: bool,
        gate: ActiveGate,
    ) {
        let engines = RunnerEngines {
            remote: match (use_remote, &api_key) {
                (true, Some(key)) => self
                    .engines
                    .remote(&self.config.remote, key)
                    .map_err(|e| warn!("Remote engine unavailable: {e}"))
                    .ok(),
                _ => None,
            },
            fallback: self
                .engines
                .fallback(&self.config.fallback)
                .map_err(|e| warn!("Fallback engine unavailable: {e}"))
                .ok(),
        };

        let runner = JobRunner {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            media: Arc::clone(&self.media),
            engines,
            progress_tx: self.progress_tx.clone(),
            job_id,
            roles,
            resume,
        };

        let handle = tokio::spawn(async move {
            // The gate lives exactly as long as the runner task
            let _gate = gate;
            runner.run().await;
        });
        *self.runner_handle.lock().await = Some(handle);
    }
}

/// Clears the active flag when the runner (or a failed entry point)
/// finishes.
struct ActiveGate {
    flag: Arc<AtomicBool>,
}

impl Drop for ActiveGate {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
