//! In-process sink that records everything it is asked to send.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;

use super::{DeliveryError, DeliverySink, Notice};

#[derive(Debug, Clone)]
pub(crate) enum Sent {
    File {
        caption: String,
        file_name: String,
        bytes: usize,
        at: Instant,
    },
    Message(String),
    Notice(Notice),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    sent: Mutex<Vec<Sent>>,
    /// Archive names (`*.zip`) whose upload is answered with HTTP 500.
    failing: HashSet<String>,
}

impl RecordingSink {
    pub(crate) fn failing_on(names: &[&str]) -> Self {
        Self {
            sent: Mutex::default(),
            failing: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn files(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::File { file_name, .. } => Some(file_name),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn notices(&self) -> Vec<Notice> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Notice(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Message(m) => Some(m),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver_file(
        &self,
        caption: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(Sent::File {
            caption: caption.to_string(),
            file_name: file_name.to_string(),
            bytes: bytes.len(),
            at: Instant::now(),
        });
        if self.failing.contains(file_name) {
            return Err(DeliveryError::HttpStatus {
                status: 500,
                body: "internal error".into(),
            });
        }
        Ok(())
    }

    async fn post_message(&self, text: &str) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(Sent::Message(text.to_string()));
        Ok(())
    }

    async fn notify(&self, notice: &Notice) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(Sent::Notice(notice.clone()));
        Ok(())
    }
}
