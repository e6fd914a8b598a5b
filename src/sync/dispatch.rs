//! Paced, concurrent delivery of staged archives.
//!
//! Every upload is its own tokio task. Submissions are spaced by a fixed
//! delay to stay under the sink's rate limit, but once submitted the tasks
//! run side by side and the dispatcher waits for all of them. One failed
//! upload never cancels another; its error is kept as that file's outcome.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;

use super::archive::ArchiveJob;
use super::gate::{SizeGate, Verdict};
use super::report::{DeliveryOutcome, FileIssue};
use super::status::StatusReporter;
use crate::webhook::{code_block, DeliveryError, DeliverySink, Notice, NoticeLevel};

/// What a task in the wait set was sending.
#[derive(Debug)]
enum Submission {
    File(usize),
    Notice(&'static str),
}

type Pending = (Submission, JoinHandle<Result<(), DeliveryError>>);

pub struct Dispatcher {
    primary: Arc<dyn DeliverySink>,
    admin: Arc<dyn DeliverySink>,
    gate: SizeGate,
    delay: Duration,
    role_mention: Option<String>,
    user_mention: Option<String>,
    /// Also report unchanged files and empty runs to the admin sink.
    notify_idle: bool,
}

impl Dispatcher {
    pub fn new(primary: Arc<dyn DeliverySink>, admin: Arc<dyn DeliverySink>, gate: SizeGate) -> Self {
        Self {
            primary,
            admin,
            gate,
            delay: Duration::ZERO,
            role_mention: None,
            user_mention: None,
            notify_idle: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_mentions(mut self, role: Option<String>, user: Option<String>) -> Self {
        self.role_mention = role.filter(|m| !m.is_empty());
        self.user_mention = user.filter(|m| !m.is_empty());
        self
    }

    pub fn with_idle_notices(mut self, enabled: bool) -> Self {
        self.notify_idle = enabled;
        self
    }

    /// Gate `jobs`, deliver the deliverable ones and wait for every send.
    ///
    /// The oversized and issue notices and the batch announcement join the
    /// same wait set as the uploads. Returns one outcome per job, in job order.
    pub async fn dispatch(
        &self,
        jobs: &[ArchiveJob],
        issues: &[FileIssue],
        unchanged: &[String],
        reporter: &StatusReporter,
    ) -> Vec<DeliveryOutcome> {
        let mut outcomes: Vec<DeliveryOutcome> = vec![DeliveryOutcome::SkippedOversized; jobs.len()];
        let mut deliverable = Vec::new();
        let mut oversized = Vec::new();
        for (idx, job) in jobs.iter().enumerate() {
            match self.gate.classify(job.size_bytes) {
                Verdict::Deliverable => deliverable.push(idx),
                Verdict::Oversized => {
                    tracing::warn!(
                        "{} is too large after compression ({:.1}MB > {}MB), not sending",
                        job.file_name,
                        job.size_mib(),
                        self.gate.ceiling_mib()
                    );
                    oversized.push(job);
                }
            }
        }

        let mut pending: Vec<Pending> = Vec::new();

        if !issues.is_empty() {
            pending.push((
                Submission::Notice("issues"),
                self.spawn_notice(self.issues_notice(issues)),
            ));
        }
        if !oversized.is_empty() {
            pending.push((
                Submission::Notice("oversized"),
                self.spawn_notice(self.oversized_notice(&oversized)),
            ));
        }
        if self.notify_idle && !unchanged.is_empty() {
            pending.push((
                Submission::Notice("unchanged"),
                self.spawn_notice(unchanged_notice(unchanged)),
            ));
        }

        if !deliverable.is_empty() {
            reporter.progress("Sending files...", 50);
            let announcement = self.announcement(deliverable.iter().map(|&i| &jobs[i]));
            let sink = Arc::clone(&self.primary);
            pending.push((
                Submission::Notice("announcement"),
                tokio::spawn(async move { sink.post_message(&announcement).await }),
            ));

            let total = deliverable.len();
            for (n, &idx) in deliverable.iter().enumerate() {
                tokio::time::sleep(self.delay).await;
                let job = &jobs[idx];
                pending.push((Submission::File(idx), self.spawn_upload(job)));
                reporter.file_submitted(&job.file_name);
                let percent = 50 + (40 * (n + 1) / total) as u8;
                reporter.progress(format!("Sending {}...", job.file_name), percent);
            }
        }

        let (labels, handles): (Vec<Submission>, Vec<_>) = pending.into_iter().unzip();
        let results = join_all(handles).await;

        for (label, joined) in labels.into_iter().zip(results) {
            let result = joined.unwrap_or_else(|e| Err(DeliveryError::Aborted(e.to_string())));
            match (label, result) {
                (Submission::File(idx), Ok(())) => {
                    tracing::info!("Sent {}", jobs[idx].file_name);
                    outcomes[idx] = DeliveryOutcome::Delivered;
                }
                (Submission::File(idx), Err(e)) => {
                    tracing::error!(status = ?e.status(), "Failed to send {}: {}", jobs[idx].file_name, e);
                    if e.is_rate_limited() {
                        tracing::warn!("Webhook is rate limiting; consider a longer --delay");
                    }
                    outcomes[idx] = DeliveryOutcome::Failed(e.to_string());
                }
                (Submission::Notice(kind), Ok(())) => {
                    tracing::debug!(kind, "Notice delivered");
                }
                (Submission::Notice(kind), Err(e)) => {
                    tracing::error!(kind, "Failed to send notice: {}", e);
                }
            }
        }
        outcomes
    }

    fn spawn_upload(&self, job: &ArchiveJob) -> JoinHandle<Result<(), DeliveryError>> {
        let sink = Arc::clone(&self.primary);
        let caption = job.caption();
        let file_name = job.archive_name();
        let path = job.archive_path.clone();
        tokio::spawn(async move {
            let bytes = tokio::fs::read(&path).await?;
            sink.deliver_file(&caption, &file_name, bytes).await
        })
    }

    fn spawn_notice(&self, notice: Notice) -> JoinHandle<Result<(), DeliveryError>> {
        let sink = Arc::clone(&self.admin);
        tokio::spawn(async move {
            let result = sink.notify(&notice).await;
            if result.is_err() {
                tracing::warn!("Undelivered notice:\n{}", notice.to_text());
            }
            result
        })
    }

    fn announcement<'a>(&self, jobs: impl Iterator<Item = &'a ArchiveJob>) -> String {
        let lines: Vec<String> = jobs.map(ArchiveJob::caption).collect();
        match &self.role_mention {
            Some(role) => format!("{}\n{}", role, lines.join("\n")),
            None => lines.join("\n"),
        }
    }

    fn issues_notice(&self, issues: &[FileIssue]) -> Notice {
        let lines: Vec<String> = issues.iter().map(FileIssue::to_string).collect();
        Notice::new(NoticeLevel::Error, "Errors while processing files", code_block(&lines))
            .with_mention(self.user_mention.as_deref())
    }

    fn oversized_notice(&self, jobs: &[&ArchiveJob]) -> Notice {
        let lines: Vec<String> = jobs
            .iter()
            .map(|j| format!("{} (compressed size: {:.1} MB)", j.file_name, j.size_mib()))
            .collect();
        Notice::new(NoticeLevel::Warning, "Files not sent (too large)", code_block(&lines))
            .with_field("Limit", format!("{} MB", self.gate.ceiling_mib()))
            .with_mention(self.user_mention.as_deref())
    }

    /// Tell the admin sink which files went out. Skipped when nothing did.
    pub async fn notify_completion(&self, delivered: &[&ArchiveJob], force: bool) {
        if delivered.is_empty() {
            return;
        }
        let mode = if force { "forced" } else { "normal" };
        let mut notice = Notice::new(
            NoticeLevel::Success,
            "File delivery finished",
            format!("Sent {} file(s) in {} mode", delivered.len(), mode),
        );
        for job in delivered {
            notice = notice.with_field(
                job.file_name.clone(),
                format!("Size: {:.1}MB\nModified: {}", job.size_mib(), job.modified_label()),
            );
        }
        self.send_notice(&notice).await;
    }

    /// Sent on an empty run, only when idle notices are enabled.
    pub async fn notify_no_changes(&self) {
        if !self.notify_idle {
            return;
        }
        let notice = Notice::new(
            NoticeLevel::Info,
            "No changes",
            "No new files to send, everything is up to date",
        );
        self.send_notice(&notice).await;
    }

    async fn send_notice(&self, notice: &Notice) {
        if let Err(e) = self.admin.notify(notice).await {
            tracing::error!("Failed to send notice: {}", e);
            tracing::warn!("Undelivered notice:\n{}", notice.to_text());
        }
    }
}

fn unchanged_notice(unchanged: &[String]) -> Notice {
    Notice::new(
        NoticeLevel::Warning,
        "Files unchanged",
        format!(
            "These files were not sent because they have not changed since the last check:\n{}",
            code_block(unchanged)
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::recording::{RecordingSink, Sent};
    use chrono::{Local, TimeZone};
    use std::path::Path;
    use std::time::Instant;

    fn job(dir: &Path, name: &str, size_bytes: u64) -> ArchiveJob {
        let archive_path = dir.join(format!("{}.zip", name));
        std::fs::write(&archive_path, b"PK\x03\x04 archive").unwrap();
        ArchiveJob {
            file_name: name.to_string(),
            archive_path,
            size_bytes,
            source_bytes: size_bytes * 2,
            modified: Local.with_ymd_and_hms(2025, 3, 7, 9, 5, 0).unwrap(),
        }
    }

    fn dispatcher(primary: &Arc<RecordingSink>, admin: &Arc<RecordingSink>) -> Dispatcher {
        Dispatcher::new(primary.clone(), admin.clone(), SizeGate::new(8.0))
            .with_mentions(Some("<@&1>".into()), Some("<@2>".into()))
    }

    #[tokio::test]
    async fn failed_delivery_does_not_stop_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = vec![
            job(dir.path(), "UTF_1.pbo", 1000),
            job(dir.path(), "UTF_2.pbo", 1000),
            job(dir.path(), "UTF_3.pbo", 1000),
        ];
        let primary = Arc::new(RecordingSink::failing_on(&["UTF_2.pbo.zip"]));
        let admin = Arc::new(RecordingSink::default());

        let outcomes = dispatcher(&primary, &admin)
            .dispatch(&jobs, &[], &[], &StatusReporter::silent())
            .await;

        assert_eq!(outcomes[0], DeliveryOutcome::Delivered);
        assert!(matches!(&outcomes[1], DeliveryOutcome::Failed(reason) if reason.contains("500")));
        assert_eq!(outcomes[2], DeliveryOutcome::Delivered);
        assert_eq!(primary.files().len(), 3);
    }

    #[tokio::test]
    async fn oversized_goes_to_admin_not_primary() {
        let dir = tempfile::tempdir().unwrap();
        let ceiling = 8 * 1_048_576;
        let jobs = vec![
            job(dir.path(), "UTF_fits.pbo", ceiling),
            job(dir.path(), "UTF_big.pbo", ceiling + 1),
        ];
        let primary = Arc::new(RecordingSink::default());
        let admin = Arc::new(RecordingSink::default());

        let outcomes = dispatcher(&primary, &admin)
            .dispatch(&jobs, &[], &[], &StatusReporter::silent())
            .await;

        assert_eq!(outcomes, vec![DeliveryOutcome::Delivered, DeliveryOutcome::SkippedOversized]);
        assert_eq!(primary.files(), vec!["UTF_fits.pbo.zip".to_string()]);
        let notices = admin.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Warning);
        assert!(notices[0].description.contains("UTF_big.pbo"));
        assert_eq!(notices[0].mention.as_deref(), Some("<@2>"));
    }

    #[tokio::test]
    async fn announcement_lists_captions_with_role_mention() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = vec![job(dir.path(), "UTF_A.pbo", 10), job(dir.path(), "UTF_B.pbo", 10)];
        let primary = Arc::new(RecordingSink::default());
        let admin = Arc::new(RecordingSink::default());

        dispatcher(&primary, &admin)
            .dispatch(&jobs, &[], &[], &StatusReporter::silent())
            .await;

        assert_eq!(
            primary.messages(),
            vec!["<@&1>\nUTF_A.pbo - 07.03 09:05\nUTF_B.pbo - 07.03 09:05".to_string()]
        );
        let captions: Vec<String> = primary
            .sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::File { caption, bytes, .. } => {
                    assert!(bytes > 0);
                    Some(caption)
                }
                _ => None,
            })
            .collect();
        assert!(captions.contains(&"UTF_A.pbo - 07.03 09:05".to_string()));
    }

    #[tokio::test]
    async fn submissions_are_paced() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = vec![
            job(dir.path(), "UTF_1.pbo", 10),
            job(dir.path(), "UTF_2.pbo", 10),
            job(dir.path(), "UTF_3.pbo", 10),
        ];
        let primary = Arc::new(RecordingSink::default());
        let admin = Arc::new(RecordingSink::default());
        let delay = Duration::from_millis(40);

        let started = Instant::now();
        dispatcher(&primary, &admin)
            .with_delay(delay)
            .dispatch(&jobs, &[], &[], &StatusReporter::silent())
            .await;

        assert!(started.elapsed() >= delay * 3);
        let last = primary
            .sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::File { at, .. } => Some(at),
                _ => None,
            })
            .max()
            .unwrap();
        assert!(last.duration_since(started) >= delay * 3);
    }

    #[tokio::test]
    async fn missing_archive_is_a_failed_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let mut gone = job(dir.path(), "UTF_gone.pbo", 10);
        std::fs::remove_file(&gone.archive_path).unwrap();
        gone.archive_path = dir.path().join("nowhere.zip");
        let primary = Arc::new(RecordingSink::default());
        let admin = Arc::new(RecordingSink::default());

        let outcomes = dispatcher(&primary, &admin)
            .dispatch(&[gone], &[], &[], &StatusReporter::silent())
            .await;

        assert!(matches!(&outcomes[0], DeliveryOutcome::Failed(r) if r.contains("Could not read archive")));
        assert!(primary.files().is_empty());
    }

    #[tokio::test]
    async fn issues_and_idle_notices_reach_admin() {
        let primary = Arc::new(RecordingSink::default());
        let admin = Arc::new(RecordingSink::default());
        let issues = vec![FileIssue::new("UTF_X.pbo", "not found")];

        let outcomes = dispatcher(&primary, &admin)
            .with_idle_notices(true)
            .dispatch(&[], &issues, &["UTF_B.pbo".to_string()], &StatusReporter::silent())
            .await;

        assert!(outcomes.is_empty());
        assert!(primary.sent().is_empty());
        let mut titles: Vec<String> = admin.notices().into_iter().map(|n| n.title).collect();
        titles.sort();
        assert_eq!(titles, vec!["Errors while processing files", "Files unchanged"]);
    }

    #[tokio::test]
    async fn completion_summary_lists_delivered_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = job(dir.path(), "UTF_A.pbo", 1_048_576);
        let primary = Arc::new(RecordingSink::default());
        let admin = Arc::new(RecordingSink::default());
        let d = dispatcher(&primary, &admin);

        d.notify_completion(&[], false).await;
        assert!(admin.notices().is_empty());

        d.notify_completion(&[&a], true).await;
        let notices = admin.notices();
        assert_eq!(notices[0].level, NoticeLevel::Success);
        assert!(notices[0].description.contains("forced"));
        assert_eq!(
            notices[0].fields,
            vec![("UTF_A.pbo".to_string(), "Size: 1.0MB\nModified: 07.03 09:05".to_string())]
        );
        assert_eq!(notices[0].mention, None);
    }

    #[tokio::test]
    async fn no_changes_notice_is_opt_in() {
        let primary = Arc::new(RecordingSink::default());
        let admin = Arc::new(RecordingSink::default());

        dispatcher(&primary, &admin).notify_no_changes().await;
        assert!(admin.notices().is_empty());

        dispatcher(&primary, &admin)
            .with_idle_notices(true)
            .notify_no_changes()
            .await;
        assert_eq!(admin.notices()[0].level, NoticeLevel::Info);
    }
}
