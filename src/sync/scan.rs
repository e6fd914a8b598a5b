//! Candidate discovery: one directory level, filtered by a naming rule.

use std::path::{Path, PathBuf};

use super::report::FileIssue;

/// How candidate files are selected from the search directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchRule {
    /// Names starting with `prefix` and ending with `suffix` (both case-sensitive).
    Prefix { prefix: String, suffix: String },
    /// An explicit list of filenames, matched case-insensitively.
    AllowList(Vec<String>),
}

impl MatchRule {
    /// Why `name` is rejected, or `None` if it is a candidate.
    fn rejection(&self, name: &str) -> Option<String> {
        match self {
            MatchRule::Prefix { prefix, suffix } => {
                if !name.starts_with(prefix.as_str()) {
                    Some(format!("missing prefix {}", prefix))
                } else if !name.ends_with(suffix.as_str()) {
                    Some(format!("not a {} file", suffix))
                } else {
                    None
                }
            }
            MatchRule::AllowList(names) => {
                if names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                    None
                } else {
                    Some("not in target list".to_string())
                }
            }
        }
    }
}

impl std::fmt::Display for MatchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchRule::Prefix { prefix, suffix } => write!(f, "{}*{}", prefix, suffix),
            MatchRule::AllowList(names) => write!(f, "[{}]", names.join(", ")),
        }
    }
}

/// A file that passed the naming rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    /// Sorted by filename.
    pub candidates: Vec<Candidate>,
    /// Problems worth reporting to an operator (missing directory or targets).
    pub issues: Vec<FileIssue>,
}

/// List the regular files directly inside `dir` that satisfy `rule`.
///
/// Never fails: a missing or unreadable directory produces an empty result
/// plus an issue, and files that fail the rule are logged and skipped.
pub fn scan_directory(dir: &Path, rule: &MatchRule) -> ScanResult {
    let mut result = ScanResult::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Search directory {} is not readable: {}", dir.display(), e);
            result.issues.push(FileIssue::new(
                dir.display().to_string(),
                format!("search directory unavailable: {}", e),
            ));
            return result;
        }
    };

    let mut names: Vec<String> = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Error reading entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => tracing::warn!("Skipping non-UTF-8 filename {:?}", raw),
        }
    }
    names.sort();

    for name in names {
        if let Some(reason) = rule.rejection(&name) {
            match rule {
                MatchRule::Prefix { .. } => tracing::warn!("Skipping {}: {}", name, reason),
                MatchRule::AllowList(_) => tracing::debug!("Skipping {}: {}", name, reason),
            }
            continue;
        }
        result.candidates.push(Candidate {
            path: dir.join(&name),
            name,
        });
    }

    if let MatchRule::AllowList(targets) = rule {
        for target in targets {
            let found = result
                .candidates
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(target));
            if !found {
                tracing::warn!("{} not found in {}", target, dir.display());
                result
                    .issues
                    .push(FileIssue::new(target.clone(), "not found"));
            }
        }
    }

    tracing::debug!(
        rule = %rule,
        found = result.candidates.len(),
        "Scanned {}",
        dir.display()
    );
    result
}
