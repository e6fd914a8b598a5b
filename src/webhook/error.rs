use thiserror::Error;

/// Typed delivery failures.
///
/// Every variant is a failure for the single message it belongs to; the
/// dispatcher records it and carries on with the other deliveries.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP {status} from sink: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Could not read archive: {0}")]
    Io(#[from] std::io::Error),

    #[error("Delivery task aborted: {0}")]
    Aborted(String),
}

impl DeliveryError {
    /// Whether the sink answered but refused the message for rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DeliveryError::HttpStatus { status: 429, .. })
    }

    /// HTTP status, when the sink answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::HttpStatus { status, .. } => Some(*status),
            DeliveryError::Http(e) => e.status().map(|s| s.as_u16()),
            DeliveryError::Io(_) | DeliveryError::Aborted(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_shows_body() {
        let e = DeliveryError::HttpStatus {
            status: 413,
            body: "{\"message\": \"Request entity too large\"}".into(),
        };
        assert_eq!(e.status(), Some(413));
        assert!(!e.is_rate_limited());
        assert!(e.to_string().contains("Request entity too large"));
    }

    #[test]
    fn http_429_is_rate_limited() {
        let e = DeliveryError::HttpStatus {
            status: 429,
            body: String::new(),
        };
        assert!(e.is_rate_limited());
    }

    #[test]
    fn io_error_has_no_status() {
        let e = DeliveryError::Io(std::io::Error::other("gone"));
        assert_eq!(e.status(), None);
    }

    #[tokio::test]
    async fn connection_error_has_no_status() {
        let err = reqwest::Client::new()
            .post("http://127.0.0.1:1")
            .send()
            .await
            .unwrap_err();
        let e = DeliveryError::Http(err);
        assert_eq!(e.status(), None);
        assert!(e.to_string().starts_with("Transport error"));
    }
}
