//! Transport error taxonomy.

/// Error type for fetch operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {status} for {url}")]
    Http { status: u16, url: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request aborted")]
    Aborted,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Request error: {0}")]
    Request(String),
}

impl FetchError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 4xx response. Never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(s) if (400..500).contains(&s))
    }

    /// 5xx (or higher) response.
    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(s) if s >= 500)
    }

    /// Network error, timeout or server error: worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_)) || self.is_server_error()
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Deserialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> FetchError {
        FetchError::Http {
            status,
            url: "https://api.example.com/stations".to_string(),
        }
    }

    #[test]
    fn test_status_classes() {
        assert!(http(404).is_client_error());
        assert!(!http(404).is_server_error());
        assert!(http(503).is_server_error());
        assert!(http(503).is_retryable());
        assert!(!http(499).is_retryable());
    }

    #[test]
    fn test_network_errors_are_retryable() {
        assert!(FetchError::Connection("refused".into()).is_retryable());
        assert!(FetchError::Timeout("5s".into()).is_retryable());
        assert!(!FetchError::Aborted.is_retryable());
        assert!(!FetchError::Decode("bad gzip".into()).is_retryable());
    }

    #[test]
    fn test_status_accessor() {
        assert_eq!(http(500).status(), Some(500));
        assert_eq!(FetchError::Aborted.status(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            http(502).to_string(),
            "HTTP error: 502 for https://api.example.com/stations"
        );
        assert_eq!(FetchError::Aborted.to_string(), "Request aborted");
    }
}
