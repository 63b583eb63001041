//! Durable relay cursors
//!
//! A checkpoint is a small text file holding one decimal number: the next
//! teleport id for the sign relay, the last completed block for the receipt
//! relay. It only speeds up resumption; the destination contract decides
//! what was already handled.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{OracleError, Result};

#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored value. A missing file is `None`; an unreadable or
    /// malformed file is an error.
    pub fn load(&self) -> Result<Option<u64>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(OracleError::Checkpoint(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed.parse().map(Some).map_err(|e| {
            OracleError::Checkpoint(format!(
                "Invalid checkpoint in {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Persist `value`, replacing the file atomically.
    pub fn save(&self, value: u64) -> Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, value.to_string()).map_err(|e| {
            OracleError::Checkpoint(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            OracleError::Checkpoint(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e
            ))
        })?;
        debug!(path = %self.path.display(), value, "Checkpoint saved");
        Ok(())
    }
}

/// First block to scan after a restart: the saved block rewound by `margin`,
/// never below `genesis`.
pub fn resume_block(saved: u64, margin: u64, genesis: u64) -> u64 {
    saved.saturating_sub(margin).max(genesis)
}

#[cfg(test)]
pub(crate) fn temp_path(name: &str) -> PathBuf {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "teleport-oracle-{}-{}-{}",
        std::process::id(),
        n,
        name
    ))
}
