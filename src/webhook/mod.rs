//! Delivery sinks.
//!
//! The pipeline only knows the [`DeliverySink`] capability: deliver a file
//! with a caption, post a plain message, or send an administrative notice.
//! [`WebhookSink`] implements it for a chat-style webhook that accepts
//! multipart uploads and JSON embeds.

pub mod error;
pub mod notice;
#[cfg(test)]
pub(crate) mod recording;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, Url};

pub use self::error::DeliveryError;
pub use self::notice::{code_block, Notice, NoticeLevel};

/// Longest response body kept for diagnostics.
const MAX_ERROR_BODY: usize = 2048;

/// Transport-agnostic delivery capability.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Upload `bytes` as an attachment named `file_name`, with `caption` as
    /// the message text.
    async fn deliver_file(
        &self,
        caption: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), DeliveryError>;

    /// Post a plain text message.
    async fn post_message(&self, text: &str) -> Result<(), DeliveryError>;

    /// Send a formatted administrative notice.
    async fn notify(&self, notice: &Notice) -> Result<(), DeliveryError>;
}

/// Webhook sink: multipart `content` + `file` for uploads, JSON for notices.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    url: Url,
}

impl WebhookSink {
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }
}

/// Build the shared HTTP client. `reqwest::Client` is `Arc`-backed, so the
/// primary and administrative sinks share one connection pool.
pub fn build_client(timeout: Duration) -> Result<Client, DeliveryError> {
    let client = Client::builder()
        .timeout(timeout)
        .user_agent(concat!("pbo-relay/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Any 2xx is success; everything else carries the body for diagnostics.
async fn check_status(response: Response) -> Result<(), DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(DeliveryError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl DeliverySink for WebhookSink {
    async fn deliver_file(
        &self,
        caption: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), DeliveryError> {
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/zip")?;
        let form = Form::new()
            .text("content", caption.to_string())
            .part("file", part);

        let response = self
            .client
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await?;
        check_status(response).await?;
        tracing::debug!(file = file_name, bytes = size, "Sink accepted file");
        Ok(())
    }

    async fn post_message(&self, text: &str) -> Result<(), DeliveryError> {
        let form = Form::new().text("content", text.to_string());
        let response = self
            .client
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await?;
        check_status(response).await
    }

    async fn notify(&self, notice: &Notice) -> Result<(), DeliveryError> {
        let payload = notice.to_payload(chrono::Utc::now());
        let response = self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await?;
        check_status(response).await?;
        tracing::debug!(title = %notice.title, "Sink accepted notice");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one HTTP request, answer with `status_line` and `body`, and
    /// hand back the raw request text.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).into_owned()
        });
        let url = Url::parse(&format!("http://{}/hook", addr)).unwrap();
        (url, handle)
    }

    fn sink(url: Url) -> WebhookSink {
        WebhookSink::new(build_client(Duration::from_secs(5)).unwrap(), url)
    }

    #[tokio::test]
    async fn deliver_file_sends_multipart_content_and_file() {
        let (url, server) = serve_once("200 OK", "{}").await;
        sink(url)
            .deliver_file("UTF_A.pbo - 07.03 09:05", "UTF_A.pbo.zip", b"PK-bytes".to_vec())
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains("name=\"content\""));
        assert!(request.contains("UTF_A.pbo - 07.03 09:05"));
        assert!(request.contains("name=\"file\"; filename=\"UTF_A.pbo.zip\""));
        assert!(request.contains("PK-bytes"));
    }

    #[tokio::test]
    async fn no_content_response_is_success() {
        let (url, server) = serve_once("204 No Content", "").await;
        sink(url).post_message("hello").await.unwrap();
        assert!(server.await.unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn non_2xx_is_failure_with_body() {
        let (url, server) = serve_once("429 Too Many Requests", "slow down").await;
        let err = sink(url)
            .deliver_file("c", "f.zip", vec![1, 2, 3])
            .await
            .unwrap_err();
        server.await.unwrap();
        assert!(err.is_rate_limited());
        match err {
            DeliveryError::HttpStatus { body, .. } => assert_eq!(body, "slow down"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn notify_posts_json_embed() {
        let (url, server) = serve_once("200 OK", "{}").await;
        let notice = Notice::new(NoticeLevel::Error, "Errors while processing files", "x")
            .with_mention(Some("<@7>"));
        sink(url).notify(&notice).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(request.contains("\"title\":\"Errors while processing files\""));
        assert!(request.contains("\"content\":\"<@7>\""));
    }

    #[tokio::test]
    async fn refused_connection_is_transport_failure() {
        let url = Url::parse("http://127.0.0.1:1/hook").unwrap();
        let err = sink(url).post_message("hi").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Http(_)));
    }
}
