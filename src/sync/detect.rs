//! Content-hash change detection.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use super::report::FileIssue;
use super::scan::Candidate;
use crate::state::HashStore;

/// Read size for hashing. Memory use is bounded by this regardless of file size.
const CHUNK_SIZE: usize = 64 * 1024;

/// Hex-encoded SHA-256 of the file at `path`, streamed in fixed-size chunks.
pub fn fingerprint(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    let hash = hasher.finalize();
    Ok(hash.iter().map(|b| format!("{:02x}", b)).collect())
}

#[derive(Debug, Default)]
pub struct Detection {
    /// Changed candidates, in scan order.
    pub changed: Vec<Candidate>,
    pub unchanged: Vec<String>,
    /// Files that could not be hashed.
    pub issues: Vec<FileIssue>,
    /// Fingerprint each changed file had before detection, by candidate name.
    previous: HashMap<String, Option<String>>,
}

impl Detection {
    /// Put back the entry `name` had before detection overwrote it.
    ///
    /// Used when a changed file drops out of the run before delivery, so the
    /// next run still sees it as changed. Names that were not changed here
    /// are left alone.
    pub fn restore(&self, name: &str, store: &mut HashStore) {
        match self.previous.get(name) {
            Some(Some(fingerprint)) => store.set(name, fingerprint.clone()),
            Some(None) => {
                store.remove(name);
            }
            None => {}
        }
    }
}

/// Partition `candidates` into changed and unchanged against `store`.
///
/// A file whose fingerprint differs from the stored one (or has none) is
/// changed, and its new fingerprint is written to `store` immediately, before
/// any delivery is attempted. A file that cannot be hashed is reported and
/// leaves its store entry untouched. With `force`, every hashable candidate
/// counts as changed.
pub fn detect_changes(candidates: &[Candidate], store: &mut HashStore, force: bool) -> Detection {
    let mut detection = Detection::default();

    for candidate in candidates {
        let current = match fingerprint(&candidate.path) {
            Ok(fp) => fp,
            Err(e) => {
                tracing::warn!("Could not hash {}: {}", candidate.path.display(), e);
                detection
                    .issues
                    .push(FileIssue::new(&candidate.name, format!("hash failed: {}", e)));
                continue;
            }
        };

        let previous = store.get(&candidate.name).map(str::to_string);
        tracing::debug!(
            file = %candidate.name,
            previous = previous.as_deref().unwrap_or("-"),
            current = %current,
            "Compared fingerprints"
        );

        if !force && previous.as_deref() == Some(current.as_str()) {
            tracing::info!("{} unchanged since last check", candidate.name);
            detection.unchanged.push(candidate.name.clone());
            continue;
        }

        store.set(&candidate.name, current);
        detection.previous.insert(candidate.name.clone(), previous);
        detection.changed.push(candidate.clone());
    }

    detection
}

/// How a tracked file compares with its recorded fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedState {
    Current,
    Changed,
    Missing,
}

/// Compare every file recorded in `store` against what is in `dir` now.
/// Read-only: the store is not updated.
pub fn compare_tracked(store: &HashStore, dir: &Path) -> Vec<(String, TrackedState)> {
    store
        .iter()
        .map(|(name, recorded)| {
            let state = match fingerprint(&dir.join(name)) {
                Ok(current) if current == recorded => TrackedState::Current,
                Ok(_) => TrackedState::Changed,
                Err(_) => TrackedState::Missing,
            };
            (name.to_string(), state)
        })
        .collect()
}
