//! Per-file outcomes and the aggregate run result.

use crate::types::PartialFailurePolicy;

/// A per-file problem worth surfacing to an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIssue {
    pub file_name: String,
    pub reason: String,
}

impl FileIssue {
    pub fn new(file_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for FileIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.file_name, self.reason)
    }
}

/// Result of one delivery attempt for one archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
    SkippedOversized,
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    NoChanges,
    Error,
}

/// What a run did, for the caller and for status display.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub message: String,
    pub delivered: Vec<String>,
    /// `(file, reason)` for every delivery that failed.
    pub failed: Vec<(String, String)>,
    pub oversized: Vec<String>,
    pub unchanged: Vec<String>,
    pub issues: Vec<FileIssue>,
    /// False when the hash state could not be written.
    pub state_saved: bool,
}

impl RunReport {
    pub fn new(outcome: RunOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
            delivered: Vec::new(),
            failed: Vec::new(),
            oversized: Vec::new(),
            unchanged: Vec::new(),
            issues: Vec::new(),
            state_saved: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(RunOutcome::Error, message)
    }

    pub fn no_changes(unchanged: Vec<String>, issues: Vec<FileIssue>) -> Self {
        let mut report = Self::new(RunOutcome::NoChanges, "No new files to send");
        report.unchanged = unchanged;
        report.issues = issues;
        report
    }

    /// At least one delivery failed.
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn is_error(&self) -> bool {
        self.outcome == RunOutcome::Error
    }

    /// Settle the outcome of a run that reached the finalizing step.
    ///
    /// A persistence failure is an error. Failed deliveries are an error only
    /// under [`PartialFailurePolicy::Error`]; otherwise the run succeeds and
    /// names the failures in its message.
    pub fn finalize(&mut self, policy: PartialFailurePolicy) {
        let mut message = format!("Sent {} file(s)", self.delivered.len());
        if !self.oversized.is_empty() {
            message.push_str(&format!(
                ", {} too large ({})",
                self.oversized.len(),
                self.oversized.join(", ")
            ));
        }
        if self.is_partial() {
            let names: Vec<&str> = self.failed.iter().map(|(n, _)| n.as_str()).collect();
            message.push_str(&format!(
                ", {} failed ({})",
                self.failed.len(),
                names.join(", ")
            ));
        }
        if !self.state_saved {
            message.push_str("; hash state was not saved, files may be resent");
        }

        let failed_run = !self.state_saved
            || (self.is_partial() && policy == PartialFailurePolicy::Error);
        self.outcome = if failed_run {
            RunOutcome::Error
        } else {
            RunOutcome::Success
        };
        self.message = message;
    }
}
