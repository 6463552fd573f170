//! Chunk planning and rendering
//!
//! Slices a source recording into overlapping chunks. Planning is pure
//! arithmetic; rendering goes through the media backend and each rendered
//! file is content-hashed for debugging identity.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::hashing;
use crate::media::MediaBackend;
use crate::types::round_ms;

/// One planned chunk. `index` is dense from 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub index: u32,
    pub start_sec: f64,
    pub end_sec: f64,
    pub file_name: String,
}

impl ChunkPlan {
    pub fn duration_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }
}

/// File name for a chunk index: `chunk_0000.m4a`, `chunk_0001.m4a`, …
pub fn chunk_file_name(index: u32) -> String {
    format!("chunk_{index:04}.m4a")
}

/// Computes the chunk plan for a recording of `duration` seconds.
///
/// Step size is `max(1, chunk_duration − overlap)`; chunk `i` spans
/// `[i·step, min(duration, i·step + chunk_duration)]`. Iteration stops once
/// a start lands at or past the end, so indices stay dense and the union
/// of spans covers `[0, duration]`.
pub fn plan_chunks(duration: f64, config: &ChunkingConfig) -> Vec<ChunkPlan> {
    let step = (config.chunk_duration_sec - config.overlap_sec).max(1.0);
    let mut plans = Vec::new();
    let mut index = 0u32;

    loop {
        let start = index as f64 * step;
        if start >= duration {
            break;
        }
        let end = (start + config.chunk_duration_sec).min(duration);
        plans.push(ChunkPlan {
            index,
            start_sec: round_ms(start),
            end_sec: round_ms(end),
            file_name: chunk_file_name(index),
        });
        index += 1;
    }

    plans
}

pub struct Chunker<'a> {
    backend: &'a dyn MediaBackend,
    config: ChunkingConfig,
}

impl<'a> Chunker<'a> {
    pub fn new(backend: &'a dyn MediaBackend, config: ChunkingConfig) -> Self {
        Self { backend, config }
    }

    /// Probes the source, plans the chunks, and renders each into `dir`.
    /// Returns the probed duration and the plan with per-file hashes.
    pub async fn create_chunks(
        &self,
        source: &Path,
        dir: &Path,
    ) -> Result<(f64, Vec<(ChunkPlan, String)>)> {
        let duration = self.backend.probe_duration(source).await?;
        let plans = plan_chunks(duration, &self.config);
        debug!(
            "Planned {} chunks over {duration:.1}s ({}s nominal, {}s overlap)",
            plans.len(),
            self.config.chunk_duration_sec,
            self.config.overlap_sec
        );

        let mut rendered = Vec::with_capacity(plans.len());
        for plan in plans {
            let out = dir.join(&plan.file_name);
            let hash = self.render(source, &out, &plan).await?;
            rendered.push((plan, hash));
        }
        Ok((duration, rendered))
    }

    /// Renders one chunk, replacing any existing file, and returns the
    /// content hash of the output. Used both at first planning and when a
    /// resume finds a chunk file missing on disk.
    pub async fn render(&self, source: &Path, out: &Path, plan: &ChunkPlan) -> Result<String> {
        self.backend
            .render_chunk(source, out, plan.start_sec, plan.duration_sec())
            .await?;
        let hash = hashing::hash_file(out).await?;
        Ok(hash)
    }

    pub fn chunk_output_path(&self, dir: &Path, index: u32) -> PathBuf {
        dir.join(chunk_file_name(index))
    }
}
