//! Process-level lock guarding a hash-state file.

use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use super::error::StateError;

/// Exclusive advisory lock on `<state-file>.lock`.
///
/// Held for the lifetime of the process so two relays never mutate the same
/// store. The lock is released when the value is dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    /// Kept open: the advisory lock lives as long as the descriptor.
    _file: std::fs::File,
}

impl RunLock {
    pub fn lock_path(state_path: &Path) -> PathBuf {
        let mut name = state_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "file_hashes.json".into());
        name.push(".lock");
        state_path.with_file_name(name)
    }

    /// Acquire the lock for `state_path`, failing fast if another process holds it.
    pub async fn acquire(state_path: &Path) -> Result<Self, StateError> {
        let lock_path = Self::lock_path(state_path);
        let file = tokio::task::spawn_blocking({
            let lock_path = lock_path.clone();
            move || {
                if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|source| StateError::Write {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                let file =
                    std::fs::File::create(&lock_path).map_err(|source| StateError::Write {
                        path: lock_path.clone(),
                        source,
                    })?;
                file.try_lock_exclusive()
                    .map_err(|_| StateError::Locked(lock_path.clone()))?;
                Ok::<std::fs::File, StateError>(file)
            }
        })
        .await??;

        tracing::debug!(path = %lock_path.display(), "Acquired run lock");
        Ok(Self {
            path: lock_path,
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
