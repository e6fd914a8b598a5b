//! Error types for the hash-state module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading, saving, or locking the hash state.
#[derive(Error, Debug)]
pub enum StateError {
    /// Failed to read the hash-state file.
    #[error("Failed to read hash state at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The hash-state file exists but is not a JSON object of strings.
    #[error("Hash state at {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to write or replace the hash-state file.
    #[error("Failed to write hash state at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize the in-memory store.
    #[error("Failed to serialize hash state: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Another process already holds the run lock for this state file.
    #[error("Another pbo-relay instance is running for this state file (lock: {0})")]
    Locked(PathBuf),

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),
}

impl StateError {
    /// Whether the error happened while persisting the store.
    ///
    /// Saves go through a temp file, so a failed write never truncates the
    /// previously persisted version.
    pub fn is_write(&self) -> bool {
        matches!(self, StateError::Write { .. } | StateError::Serialize(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_errors_are_classified() {
        let e = StateError::Write {
            path: PathBuf::from("x.json"),
            source: std::io::Error::other("disk full"),
        };
        assert!(e.is_write());
        assert!(e.to_string().contains("x.json"));
    }

    #[test]
    fn locked_error_names_lock_path() {
        let e = StateError::Locked(PathBuf::from("/tmp/state.json.lock"));
        assert!(!e.is_write());
        assert!(e.to_string().contains("Another pbo-relay instance"));
    }
}
