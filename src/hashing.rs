//! Streaming content hashing
//!
//! SHA-256 over file contents in fixed-size blocks. Used as content
//! identity for source files and rendered chunks; never loads a whole
//! file into memory.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use tokio::task;

/// Block size for the streaming read. 1 MiB keeps syscall overhead low
/// without holding large buffers.
const BLOCK_SIZE: usize = 1024 * 1024;

/// Computes the lowercase hex SHA-256 digest of the file at `path`.
pub async fn hash_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref().to_path_buf();

    task::spawn_blocking(move || -> Result<String> {
        let mut file = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open {} for hashing", path.display()))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; BLOCK_SIZE];

        loop {
            let read = file
                .read(&mut buffer)
                .with_context(|| format!("Failed to read {} while hashing", path.display()))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    })
    .await?
}
