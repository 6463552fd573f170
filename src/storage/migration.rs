use anyhow::{Context, Result};
use std::collections::HashMap;

use crate::storage::Database;

/// Database migration management
pub struct MigrationManager {
    db: Database,
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub name: String,
    pub up_sql: &'static str,
}

const V1_CREATE_JOBS_AND_CHUNKS: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    source_path TEXT NOT NULL,
    source_name TEXT NOT NULL,
    source_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    duration_sec REAL,
    chunks_total INTEGER NOT NULL DEFAULT 0,
    chunks_done INTEGER NOT NULL DEFAULT 0,
    transcript_json TEXT,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS chunks (
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    idx INTEGER NOT NULL,
    start_sec REAL NOT NULL,
    end_sec REAL NOT NULL,
    chunk_path TEXT NOT NULL,
    chunk_hash TEXT,
    status TEXT NOT NULL,
    engine TEXT,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    transcript_json TEXT,
    confidence REAL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (job_id, idx)
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_updated_at ON jobs(updated_at);
";

const V2_ADD_SPEAKER_COUNTS: &str = "
ALTER TABLE jobs ADD COLUMN interviewer_count INTEGER NOT NULL DEFAULT 1;
ALTER TABLE jobs ADD COLUMN participant_count INTEGER NOT NULL DEFAULT 1;
";

impl MigrationManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get all available migrations
    pub fn get_migrations() -> Vec<Migration> {
        vec![
            Migration {
                version: 1,
                name: "create_jobs_and_chunks".to_string(),
                up_sql: V1_CREATE_JOBS_AND_CHUNKS,
            },
            Migration {
                version: 2,
                name: "add_speaker_counts".to_string(),
                up_sql: V2_ADD_SPEAKER_COUNTS,
            },
        ]
    }

    /// Run all pending migrations
    pub async fn migrate_up(&self) -> Result<Vec<u32>> {
        self.db
            .with_connection(|conn| {
                // Create migrations table if it doesn't exist
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS schema_migrations (
                        version INTEGER PRIMARY KEY,
                        name TEXT NOT NULL,
                        applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                        checksum TEXT NOT NULL
                    );",
                    [],
                )
                .context("Failed to create migrations table")?;

                // Get applied migrations
                let mut applied_migrations = HashMap::new();
                {
                    let mut stmt =
                        conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
                    let rows = stmt.query_map([], |row| Ok(row.get::<_, i64>(0)? as u32))?;

                    for version in rows {
                        applied_migrations.insert(version?, true);
                    }
                }

                let mut applied = Vec::new();
                let migrations = Self::get_migrations();

                // Apply pending migrations in versioned order
                for migration in migrations {
                    if !applied_migrations.contains_key(&migration.version) {
                        tracing::info!(
                            "Applying migration {} - {}",
                            migration.version,
                            migration.name
                        );

                        let checksum = format!("{:x}", md5::compute(migration.up_sql.as_bytes()));

                        let tx = conn.unchecked_transaction()?;

                        tx.execute_batch(migration.up_sql).with_context(|| {
                            format!("Failed to execute migration {}", migration.version)
                        })?;

                        tx.execute(
                            "INSERT INTO schema_migrations (version, name, applied_at, checksum)
                             VALUES (?1, ?2, CURRENT_TIMESTAMP, ?3)",
                            [&migration.version.to_string(), &migration.name, &checksum],
                        )
                        .with_context(|| {
                            format!("Failed to record migration {}", migration.version)
                        })?;

                        tx.commit().with_context(|| {
                            format!("Failed to commit migration {}", migration.version)
                        })?;

                        applied.push(migration.version);
                    }
                }

                Ok(applied)
            })
            .await
    }

    /// Get current database version
    pub async fn get_current_version(&self) -> Result<u32> {
        self.db
            .with_connection(|conn| {
                let table_exists: bool = conn
                    .prepare(
                        "SELECT name FROM sqlite_master WHERE type='table' AND name='schema_migrations'",
                    )?
                    .exists([])?;

                if !table_exists {
                    return Ok(0);
                }

                let mut stmt =
                    conn.prepare("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")?;
                let version: i64 = stmt.query_row([], |row| row.get(0))?;

                Ok(version as u32)
            })
            .await
    }
}
