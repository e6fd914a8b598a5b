//! JSON-backed fingerprint store.
//!
//! The on-disk format is a flat JSON object mapping each tracked filename to
//! the hex SHA-256 of its last-seen content. Lookups are case-insensitive;
//! the stored key keeps the casing the file had when it was last hashed.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::error::StateError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    fingerprint: String,
}

/// Durable record of the last-seen fingerprint per tracked file.
///
/// Owned by exactly one run at a time. It is loaded at run start, mutated
/// in memory by change detection, and persisted once in the finalizing step.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HashStore {
    /// Keyed by lower-cased filename.
    entries: BTreeMap<String, Entry>,
}

fn identity(name: &str) -> String {
    name.to_lowercase()
}

impl HashStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store from `path`.
    ///
    /// A missing file yields an empty store. A file that exists but cannot be
    /// parsed is reported as [`StateError::Parse`] so the caller can decide
    /// whether to start over.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Hash state file not found, starting empty");
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(StateError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let raw: BTreeMap<String, String> =
            serde_json::from_str(&contents).map_err(|source| StateError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut store = Self::new();
        for (name, fingerprint) in raw {
            store.set(&name, fingerprint);
        }
        tracing::debug!(path = %path.display(), entries = store.len(), "Loaded hash state");
        Ok(store)
    }

    /// Load the store, falling back to an empty one when the file is unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(store) => store,
            Err(e) => {
                tracing::error!("{}. Starting with an empty hash state.", e);
                Self::new()
            }
        }
    }

    /// Last-known fingerprint for `name`, if the file was ever recorded.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&identity(name))
            .map(|e| e.fingerprint.as_str())
    }

    /// Record `fingerprint` for `name`, replacing any entry that differs only
    /// in case.
    pub fn set(&mut self, name: &str, fingerprint: String) {
        self.entries.insert(
            identity(name),
            Entry {
                name: name.to_string(),
                fingerprint,
            },
        );
    }

    /// Forget `name`. Returns the fingerprint it had, if any.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(&identity(name)).map(|e| e.fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(filename, fingerprint)` pairs in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|e| (e.name.as_str(), e.fingerprint.as_str()))
    }

    /// Pretty-printed JSON document, keys sorted, non-ASCII left unescaped.
    pub fn to_json(&self) -> Result<String, StateError> {
        let flat: BTreeMap<&str, &str> = self.iter().collect();
        let mut json = serde_json::to_string_pretty(&flat)?;
        json.push('\n');
        Ok(json)
    }

    /// Persist the store to `path` atomically.
    ///
    /// The document is written to a sibling temp file, flushed to disk, then
    /// renamed over the target. On any failure the temp file is removed and
    /// the previous version at `path` is left as it was.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let json = self.to_json()?;
        write_atomic(path, json.as_bytes())?;
        tracing::info!(path = %path.display(), entries = self.len(), "Hash state saved");
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "file_hashes.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| StateError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let tmp = temp_path(path);
    let result = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        replace_file(&tmp, path)
    })();

    if let Err(source) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(StateError::Write {
            path: path.to_path_buf(),
            source,
        });
    }

    sync_parent_dir(path);
    Ok(())
}

fn replace_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        #[cfg(windows)]
        Err(e)
            if e.kind() == std::io::ErrorKind::AlreadyExists
                || e.kind() == std::io::ErrorKind::PermissionDenied =>
        {
            std::fs::remove_file(to)?;
            std::fs::rename(from, to)
        }
        Err(e) => Err(e),
    }
}

/// Best-effort fsync of the directory entry so the rename survives a crash.
fn sync_parent_dir(path: &Path) {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::File::open(parent).and_then(|d| d.sync_all()) {
                tracing::debug!(error = %e, "Could not fsync {}", parent.display());
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
