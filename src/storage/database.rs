use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task;

/// Database connection manager for job and chunk state
#[derive(Clone)]
pub struct Database {
    pub connection: Arc<Mutex<Connection>>,
}

impl Database {
    /// Create a new database connection
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();

        let connection = task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_READ_WRITE,
            )
            .context("Failed to open SQLite database")?;

            // Enable foreign key constraints
            conn.execute("PRAGMA foreign_keys = ON;", [])
                .context("Failed to enable foreign keys")?;

            // Set WAL mode for better concurrency
            conn.pragma_update(None, "journal_mode", "WAL")
                .context("Failed to set WAL mode")?;

            conn.pragma_update(None, "synchronous", "NORMAL")
                .context("Failed to set synchronous mode")?;

            Ok(conn)
        })
        .await??;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Open an in-memory database. Test-only convenience.
    pub async fn in_memory() -> Result<Self> {
        let connection = task::spawn_blocking(|| -> Result<Connection> {
            let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
            conn.execute("PRAGMA foreign_keys = ON;", [])
                .context("Failed to enable foreign keys")?;
            Ok(conn)
        })
        .await??;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Run a closure against the connection on the blocking pool. All
    /// store operations funnel through here so SQLite access stays
    /// serialized on the owning task.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        task::spawn_blocking(move || -> Result<T> {
            let conn = connection.lock().unwrap();
            f(&conn)
        })
        .await?
    }

    /// Check if the database is healthy
    pub async fn health_check(&self) -> Result<bool> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT 1;")?;
            let result: i32 = stmt.query_row([], |row| row.get(0))?;
            Ok(result == 1)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_creation() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("jobs.sqlite")).await.unwrap();

        let is_healthy = db.health_check().await.unwrap();
        assert!(is_healthy);
    }

    #[tokio::test]
    async fn test_with_connection_propagates_errors() {
        let db = Database::in_memory().await.unwrap();

        let result = db
            .with_connection(|conn| {
                conn.execute("SELECT * FROM does_not_exist", [])
                    .context("query should fail")?;
                Ok(())
            })
            .await;

        assert!(result.is_err());
    }
}
