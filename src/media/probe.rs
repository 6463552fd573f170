//! ffmpeg-backed media backend
//!
//! Locates the ffmpeg/ffprobe binaries on PATH and drives them as child
//! processes. The duration probe is bounded by a wall-clock timeout so a
//! hung media layer cannot stall a job.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::media::MediaBackend;

/// Minimum renderable chunk length. ffmpeg rejects zero-length exports.
const MIN_RENDER_SEC: f64 = 0.05;

pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    probe_timeout: Duration,
}

impl FfmpegBackend {
    /// Discovers both binaries on PATH.
    pub fn discover(probe_timeout_sec: u64) -> Result<Self> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| PipelineError::ParsingFailed {
            message: "ffmpeg blev ikke fundet på systemet".to_string(),
        })?;
        let ffprobe = which::which("ffprobe").map_err(|_| PipelineError::ParsingFailed {
            message: "ffprobe blev ikke fundet på systemet".to_string(),
        })?;
        debug!("Using ffmpeg at {:?}, ffprobe at {:?}", ffmpeg, ffprobe);
        Ok(Self {
            ffmpeg,
            ffprobe,
            probe_timeout: Duration::from_secs(probe_timeout_sec),
        })
    }

    pub fn with_paths(ffmpeg: PathBuf, ffprobe: PathBuf, probe_timeout_sec: u64) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            probe_timeout: Duration::from_secs(probe_timeout_sec),
        }
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    async fn probe_duration(&self, source: &Path) -> Result<f64> {
        let child = Command::new(&self.ffprobe)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg(source)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::ParsingFailed {
                message: format!("Kunne ikke starte ffprobe: {e}"),
            })?;

        let output = match tokio::time::timeout(self.probe_timeout, child.wait_with_output()).await
        {
            Ok(result) => result.map_err(|e| PipelineError::ParsingFailed {
                message: format!("ffprobe fejlede: {e}"),
            })?,
            // kill_on_drop reaps the hung probe when `child` is dropped here
            Err(_) => {
                return Err(PipelineError::ParsingFailed {
                    message: format!(
                        "Kunne ikke aflæse lydfilens varighed inden for {} sekunder",
                        self.probe_timeout.as_secs()
                    ),
                })
            }
        };

        if !output.status.success() {
            return Err(PipelineError::ParsingFailed {
                message: format!(
                    "ffprobe kunne ikke læse filen: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        parse_probe_duration(&output.stdout)
    }

    async fn render_chunk(
        &self,
        source: &Path,
        out: &Path,
        start_sec: f64,
        duration_sec: f64,
    ) -> Result<()> {
        let duration_sec = duration_sec.max(MIN_RENDER_SEC);

        let output = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-ss")
            .arg(format!("{start_sec:.3}"))
            .arg("-i")
            .arg(source)
            .arg("-t")
            .arg(format!("{duration_sec:.3}"))
            .arg("-vn")
            .args(["-c:a", "aac", "-b:a", "192k", "-profile:a", "aac_low"])
            .args(["-movflags", "+faststart"])
            .args(["-f", "mp4"])
            .arg(out)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::ParsingFailed {
                message: format!("Kunne ikke starte ffmpeg: {e}"),
            })?;

        if !output.status.success() {
            return Err(PipelineError::ParsingFailed {
                message: format!(
                    "Kunne ikke udskrive lydstykket {}: {}",
                    out.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

fn parse_probe_duration(stdout: &[u8]) -> Result<f64> {
    let value: serde_json::Value =
        serde_json::from_slice(stdout).map_err(|e| PipelineError::ParsingFailed {
            message: format!("Uventet ffprobe-svar: {e}"),
        })?;

    let duration = value
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| match d {
            serde_json::Value::String(s) => s.parse::<f64>().ok(),
            serde_json::Value::Number(n) => n.as_f64(),
            _ => None,
        })
        .ok_or_else(|| PipelineError::ParsingFailed {
            message: "Lydfilens varighed mangler i ffprobe-svaret".to_string(),
        })?;

    if !duration.is_finite() || duration <= 0.0 {
        return Err(PipelineError::ParsingFailed {
            message: format!("Ugyldig varighed for lydfilen: {duration}"),
        });
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_duration() {
        let json = br#"{"format": {"duration": "483.213000", "format_name": "mov,mp4"}}"#;
        let duration = parse_probe_duration(json).unwrap();
        assert!((duration - 483.213).abs() < 1e-9);
    }

    #[test]
    fn parses_numeric_duration() {
        let json = br#"{"format": {"duration": 12.5}}"#;
        assert_eq!(parse_probe_duration(json).unwrap(), 12.5);
    }

    #[test]
    fn rejects_missing_duration() {
        let json = br#"{"format": {"format_name": "wav"}}"#;
        assert!(matches!(
            parse_probe_duration(json),
            Err(PipelineError::ParsingFailed { .. })
        ));
    }

    #[test]
    fn rejects_non_positive_duration() {
        let json = br#"{"format": {"duration": "0.0"}}"#;
        assert!(parse_probe_duration(json).is_err());

        let json = br#"{"format": {"duration": "-3"}}"#;
        assert!(parse_probe_duration(json).is_err());
    }
}
