use std::time::Duration;

use thiserror::Error;

/// Failure of a unit of ingestion work, classified by retryability.
///
/// Every lower-level error (HTTP, schema, store, index) is mapped into one of
/// these variants at the crate boundary so the retry policy only has to look
/// at the classification.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    /// Network failure, timeout or 5xx. Retryable.
    #[error("transient error: {0}")]
    Transient(String),

    /// Upstream asked us to slow down. Retryable, optionally after a hint.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Malformed input or a 4xx other than rate limiting. Never retried.
    #[error("permanent error: {0}")]
    Permanent(String),
}

impl IngestError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }

    /// Server-provided minimum wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify a non-success HTTP status.
    ///
    /// 429 is rate limiting, 408 and 5xx are transient, every other status
    /// is permanent.
    pub fn from_http_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let snippet: String = body.chars().take(200).collect();
        let message = format!("HTTP {status}: {snippet}");
        match status {
            429 => Self::RateLimited {
                message,
                retry_after,
            },
            408 | 500..=599 => Self::Transient(message),
            _ => Self::Permanent(message),
        }
    }
}

/// Configuration loading failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_http_status() {
        assert!(matches!(
            IngestError::from_http_status(429, "", Some(Duration::from_secs(3))),
            IngestError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(3)
        ));
        assert!(matches!(IngestError::from_http_status(503, "", None), IngestError::Transient(_)));
        assert!(matches!(IngestError::from_http_status(408, "", None), IngestError::Transient(_)));
        assert!(matches!(IngestError::from_http_status(404, "", None), IngestError::Permanent(_)));
        assert!(matches!(IngestError::from_http_status(403, "", None), IngestError::Permanent(_)));
    }

    #[test]
    fn retryability() {
        assert!(IngestError::transient("timeout").is_retryable());
        assert!(IngestError::RateLimited { message: "slow down".into(), retry_after: None }.is_retryable());
        assert!(!IngestError::permanent("bad schema").is_retryable());
    }

    #[test]
    fn body_is_truncated_in_message() {
        let body = "x".repeat(1_000);
        let err = IngestError::from_http_status(500, &body, None);
        assert!(err.to_string().len() < 300);
    }
}
