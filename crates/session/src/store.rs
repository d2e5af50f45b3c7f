//! Log stores: where the conversation log is persisted.
//!
//! The file store keeps a pretty-printed JSON array of turns and rewrites the
//! whole file on every append. It is human-inspectable and has no external
//! dependencies.
//!
//! Default location: `~/.glimpse/conversation.json`

use std::path::{Path, PathBuf};

use glimpse_core::error::StorageError;
use glimpse_core::message::Turn;
use tracing::debug;

/// Destination for full-log snapshots.
pub trait LogStore: Send + Sync {
    /// A human-readable name (e.g., "file", "none").
    fn name(&self) -> &str;

    /// Replace the persisted log with `turns`.
    fn persist(&self, turns: &[Turn]) -> Result<(), StorageError>;
}

/// A JSON-file log store, overwritten on every persist.
pub struct FileLogStore {
    path: PathBuf,
}

impl FileLogStore {
    /// Open the store at `path`, resetting it to an empty log.
    ///
    /// Each process starts a fresh conversation; the previous file is
    /// overwritten rather than resumed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let store = Self { path: path.into() };
        store.persist(&[])?;
        debug!(path = %store.path.display(), "Conversation log reset");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a persisted log back.
    pub fn load(path: &Path) -> Result<Vec<Turn>, StorageError> {
        let content = std::fs::read_to_string(path).map_err(|e| StorageError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        serde_json::from_str(&content).map_err(|e| StorageError::Corrupted {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

impl LogStore for FileLogStore {
    fn name(&self) -> &str {
        "file"
    }

    fn persist(&self, turns: &[Turn]) -> Result<(), StorageError> {
        let write_err = |reason: String| StorageError::Write {
            path: self.path.display().to_string(),
            reason,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| write_err(format!("Failed to create log directory: {e}")))?;
        }

        let content = serde_json::to_string_pretty(turns)
            .map_err(|e| write_err(format!("Failed to serialize log: {e}")))?;

        std::fs::write(&self.path, content).map_err(|e| write_err(e.to_string()))
    }
}

/// A store that keeps nothing.
pub struct NoopLogStore;

impl LogStore for NoopLogStore {
    fn name(&self) -> &str {
        "none"
    }

    fn persist(&self, _turns: &[Turn]) -> Result<(), StorageError> {
        Ok(())
    }
}
