//! Media probing and chunk rendering
//!
//! All codec work is delegated to external ffmpeg/ffprobe processes; the
//! pipeline only plans time ranges and checks outcomes. The backend trait
//! keeps the chunker testable without media binaries installed.

pub mod chunker;
pub mod probe;

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

pub use chunker::{ChunkPlan, Chunker};
pub use probe::FfmpegBackend;

/// Seam to the media layer. The production implementation shells out to
/// ffmpeg; tests substitute a fake that writes stub files.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Total playable duration in seconds. Must fail when the value is not
    /// positive-finite, and must return within a bounded wall clock.
    async fn probe_duration(&self, source: &Path) -> Result<f64>;

    /// Renders `[start_sec, start_sec + duration_sec)` of `source` into
    /// `out` as AAC in an MP4 container, replacing any existing file.
    async fn render_chunk(
        &self,
        source: &Path,
        out: &Path,
        start_sec: f64,
        duration_sec: f64,
    ) -> Result<()>;
}
