//! Durable job and chunk state
//!
//! SQLite-backed persistence plus the on-disk job directory tree. The
//! store is the single owner of all persistent state; the coordinator
//! holds the only handle during a job.

pub mod database;
pub mod job_store;
pub mod migration;

pub use database::Database;
pub use job_store::JobStore;
pub use migration::MigrationManager;
