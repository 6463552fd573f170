//! Samtale - transcription pipeline for two-role interview audio
//!
//! A resumable, chunk-based job orchestrator that drives a remote
//! diarizing speech API with an automatic local fallback, persists
//! per-chunk progress in SQLite, and merges partial results into a
//! role-labeled (interviewer/participant) transcript with deterministic
//! line numbering for TXT and DOCX export.
//!
//! The desktop shell consumes this crate through [`pipeline::Coordinator`]
//! for the job lifecycle, [`editor`] for transcript editing, and
//! [`export`] for serialization.

pub mod config;
pub mod editor;
pub mod error;
pub mod export;
pub mod fallback;
pub mod hashing;
pub mod media;
pub mod merge;
pub mod pipeline;
pub mod remote;
pub mod storage;
pub mod types;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::Coordinator;
