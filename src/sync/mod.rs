//! Change-detection and delivery pipeline.
//!
//! One run walks `Scanning → Detecting → Archiving → Gating → Dispatching →
//! Finalizing` and always ends in a [`RunReport`]. Scanning, hashing and
//! archiving run one after another on the blocking pool, each awaited before
//! the next phase starts. Faults never escape a run: they become an `Error`
//! report for the caller.

pub mod archive;
pub mod detect;
pub mod dispatch;
pub mod gate;
pub mod report;
pub mod scan;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::state::HashStore;
use crate::types::PartialFailurePolicy;

use self::archive::{archive_all, remove_archives, ArchiveJob};
use self::detect::{detect_changes, Detection};
use self::dispatch::Dispatcher;
use self::report::{DeliveryOutcome, RunOutcome, RunReport};
use self::scan::{scan_directory, Candidate, MatchRule, ScanResult};
use self::status::StatusReporter;

/// Everything one run needs besides the hash store.
/// Decoupled from CLI parsing so the pipeline can be tested on its own.
pub struct SyncContext {
    pub(crate) directory: PathBuf,
    pub(crate) rule: MatchRule,
    pub(crate) scratch_dir: PathBuf,
    pub(crate) state_path: PathBuf,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) partial_failure: PartialFailurePolicy,
    pub(crate) force: bool,
    pub(crate) dry_run: bool,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("directory", &self.directory)
            .field("rule", &self.rule)
            .field("scratch_dir", &self.scratch_dir)
            .field("state_path", &self.state_path)
            .field("partial_failure", &self.partial_failure)
            .field("force", &self.force)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

/// Run the pipeline once against `store`.
///
/// Never fails: an unexpected fault is logged and returned as an `Error`
/// report. The terminal report is also emitted as a status event.
pub async fn run_pipeline(
    ctx: &SyncContext,
    store: &mut HashStore,
    reporter: &StatusReporter,
) -> RunReport {
    let report = match execute(ctx, store, reporter).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Run failed: {:#}", e);
            RunReport::error(format!("Run failed: {:#}", e))
        }
    };
    reporter.progress(report.message.clone(), 100);
    reporter.finished(&report);
    report
}

/// Load the store and run the pipeline in its own task.
///
/// The caller awaits the task, so runs started through one scheduler never
/// overlap. A panic inside the run is turned into an `Error` report.
pub async fn run_cycle(ctx: Arc<SyncContext>, reporter: StatusReporter) -> RunReport {
    let task_reporter = reporter.clone();
    let handle = tokio::spawn(async move {
        let mut store = HashStore::load_or_default(&ctx.state_path);
        run_pipeline(&ctx, &mut store, &task_reporter).await
    });

    match handle.await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Run aborted: {}", e);
            let report = RunReport::error(format!("Run aborted: {}", e));
            reporter.finished(&report);
            report
        }
    }
}

async fn scan_blocking(dir: PathBuf, rule: MatchRule) -> Result<ScanResult> {
    tokio::task::spawn_blocking(move || scan_directory(&dir, &rule))
        .await
        .context("Scan task failed")
}

/// Hash `candidates` on the blocking pool. The store moves into the task and
/// comes back updated.
async fn detect_blocking(
    candidates: Vec<Candidate>,
    mut store: HashStore,
    force: bool,
) -> Result<(Detection, HashStore)> {
    tokio::task::spawn_blocking(move || {
        let detection = detect_changes(&candidates, &mut store, force);
        (detection, store)
    })
    .await
    .context("Hashing task failed")
}

async fn execute(
    ctx: &SyncContext,
    store: &mut HashStore,
    reporter: &StatusReporter,
) -> Result<RunReport> {
    tracing::info!(
        "Checking {} for {}{}",
        ctx.directory.display(),
        ctx.rule,
        if ctx.force { " (force)" } else { "" }
    );
    reporter.progress("Searching for files...", 10);
    let scanned = scan_blocking(ctx.directory.clone(), ctx.rule.clone()).await?;

    if ctx.dry_run {
        return dry_run(ctx, store, scanned).await;
    }

    let (mut detection, updated) =
        detect_blocking(scanned.candidates, std::mem::take(store), ctx.force).await?;
    *store = updated;
    let mut issues = scanned.issues;
    issues.extend(std::mem::take(&mut detection.issues));

    if detection.changed.is_empty() {
        tracing::info!("No new files to send");
        ctx.dispatcher
            .dispatch(&[], &issues, &detection.unchanged, reporter)
            .await;
        if issues.is_empty() && !ctx.force {
            ctx.dispatcher.notify_no_changes().await;
        }
        return Ok(RunReport::no_changes(detection.unchanged, issues));
    }

    reporter.progress("Compressing files...", 20);
    std::fs::create_dir_all(&ctx.scratch_dir).with_context(|| {
        format!(
            "Failed to create scratch directory {}",
            ctx.scratch_dir.display()
        )
    })?;
    let changed = detection.changed.clone();
    let scratch_dir = ctx.scratch_dir.clone();
    let archived = tokio::task::spawn_blocking(move || archive_all(&changed, &scratch_dir))
        .await
        .context("Archive task failed")?;
    for issue in &archived.issues {
        detection.restore(&issue.file_name, store);
    }
    issues.extend(archived.issues);
    let jobs = archived.jobs;

    if jobs.is_empty() {
        ctx.dispatcher.dispatch(&[], &issues, &[], reporter).await;
        let mut report = RunReport::error(format!(
            "Could not archive any of the {} changed file(s)",
            detection.changed.len()
        ));
        report.unchanged = detection.unchanged;
        report.issues = issues;
        return Ok(report);
    }

    reporter.progress("Preparing to send...", 30);
    let unchanged = if ctx.force {
        Vec::new()
    } else {
        detection.unchanged.clone()
    };
    let outcomes = ctx
        .dispatcher
        .dispatch(&jobs, &issues, &unchanged, reporter)
        .await;

    let delivered: Vec<&ArchiveJob> = jobs
        .iter()
        .zip(&outcomes)
        .filter(|(_, outcome)| **outcome == DeliveryOutcome::Delivered)
        .map(|(job, _)| job)
        .collect();
    ctx.dispatcher.notify_completion(&delivered, ctx.force).await;

    reporter.progress("Finishing...", 90);
    let removed = remove_archives(&jobs);
    tracing::debug!("Removed {} of {} temporary archives", removed, jobs.len());

    let state_saved = match store.save(&ctx.state_path) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Failed to save hash state: {}", e);
            if e.is_write() {
                tracing::warn!("Previous hash state left in place; sent files may be sent again");
            }
            false
        }
    };

    let mut report = RunReport::new(RunOutcome::Success, "");
    for (job, outcome) in jobs.iter().zip(outcomes) {
        let name = job.file_name.clone();
        match outcome {
            DeliveryOutcome::Delivered => report.delivered.push(name),
            DeliveryOutcome::Failed(reason) => report.failed.push((name, reason)),
            DeliveryOutcome::SkippedOversized => report.oversized.push(name),
        }
    }
    report.unchanged = detection.unchanged;
    report.issues = issues;
    report.state_saved = state_saved;
    report.finalize(ctx.partial_failure);

    match report.outcome {
        RunOutcome::Error => tracing::error!("{}", report.message),
        _ => tracing::info!("{}", report.message),
    }
    Ok(report)
}

/// Detect against a copy of the store and describe what a real run would send.
async fn dry_run(ctx: &SyncContext, store: &HashStore, scanned: ScanResult) -> Result<RunReport> {
    let (mut detection, _) =
        detect_blocking(scanned.candidates, store.clone(), ctx.force).await?;
    let mut issues = scanned.issues;
    issues.append(&mut detection.issues);

    tracing::info!("── Dry Run Summary ──");
    for c in &detection.changed {
        tracing::info!("  would send {}", c.name);
    }
    for issue in &issues {
        tracing::warn!("  {}", issue);
    }
    tracing::info!(
        "  {} changed, {} unchanged",
        detection.changed.len(),
        detection.unchanged.len()
    );

    if detection.changed.is_empty() {
        return Ok(RunReport::no_changes(detection.unchanged, issues));
    }
    let mut report = RunReport::new(
        RunOutcome::Success,
        format!("Dry run: {} file(s) would be sent", detection.changed.len()),
    );
    report.unchanged = detection.unchanged;
    report.issues = issues;
    Ok(report)
}
