//! Status events emitted to whoever drives a run (CLI, service wrapper).

use tokio::sync::mpsc;

use super::report::RunReport;

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Free-text progress with a rough completion percentage.
    Progress { message: String, percent: u8 },
    /// A delivery for this file was just submitted.
    FileSubmitted(String),
    /// Terminal result of the run.
    Finished(RunReport),
}

/// Sending half of the status stream. Events are dropped silently when
/// nobody is listening; a run never fails because of its observer.
#[derive(Debug, Clone, Default)]
pub struct StatusReporter {
    tx: Option<mpsc::UnboundedSender<StatusEvent>>,
}

impl StatusReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A reporter that discards everything.
    #[cfg(test)]
    pub fn silent() -> Self {
        Self::default()
    }

    fn send(&self, event: StatusEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn progress(&self, message: impl Into<String>, percent: u8) {
        self.send(StatusEvent::Progress {
            message: message.into(),
            percent: percent.min(100),
        });
    }

    pub fn file_submitted(&self, name: &str) {
        self.send(StatusEvent::FileSubmitted(name.to_string()));
    }

    pub fn finished(&self, report: &RunReport) {
        self.send(StatusEvent::Finished(report.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (reporter, mut rx) = StatusReporter::channel();
        reporter.progress("Searching for files...", 10);
        reporter.file_submitted("UTF_A.pbo");
        reporter.progress("overflow", 250);
        drop(reporter);

        assert_eq!(
            rx.recv().await,
            Some(StatusEvent::Progress {
                message: "Searching for files...".into(),
                percent: 10
            })
        );
        assert_eq!(rx.recv().await, Some(StatusEvent::FileSubmitted("UTF_A.pbo".into())));
        assert!(matches!(
            rx.recv().await,
            Some(StatusEvent::Progress { percent: 100, .. })
        ));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn silent_reporter_and_dropped_receiver_are_harmless() {
        StatusReporter::silent().progress("nobody listens", 5);
        let (reporter, rx) = StatusReporter::channel();
        drop(rx);
        reporter.file_submitted("UTF_A.pbo");
    }
}
