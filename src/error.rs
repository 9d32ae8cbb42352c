//! Error taxonomy for the live-update channel
//!
//! `LinkError` is what a transport reports about the broker session and is
//! classified into retryable, terminal, and recoverable kinds. `LiveError` is
//! what callers of [`crate::LiveClient`] see.

use crate::config::ConfigError;
use crate::protocol::TopicError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a broker session
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LinkError {
    /// DNS, TLS, socket, timeout or broker-initiated disconnect - retried with backoff
    #[error("transport error: {0}")]
    Transport(String),
    /// Credentials rejected by the broker - never retried
    #[error("authentication rejected: {0}")]
    Auth(String),
    /// Malformed frame - logged and dropped
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl LinkError {
    pub fn transport<S: AsRef<str>>(message: S) -> Self {
        Self::Transport(sanitize_error_message(message.as_ref()))
    }

    pub fn auth<S: AsRef<str>>(message: S) -> Self {
        Self::Auth(sanitize_error_message(message.as_ref()))
    }

    pub fn protocol<S: AsRef<str>>(message: S) -> Self {
        Self::Protocol(sanitize_error_message(message.as_ref()))
    }

    /// Whether a connection attempt failing with this error should be retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LinkError::Auth(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, LinkError::Protocol(_))
    }
}

/// Errors returned by [`crate::LiveClient`] operations
#[derive(Debug, Error)]
pub enum LiveError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("publish queue full (capacity {capacity}), oldest message dropped")]
    Capacity { capacity: usize },

    #[error("invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("gave up after {attempts} connection attempts: {last_error}")]
    AttemptsExhausted { attempts: u32, last_error: LinkError },

    #[error("no connection within {0:?}, still retrying in the background")]
    ConnectTimeout(Duration),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("client closed")]
    Closed,
}

/// Result type for live-channel operations
pub type LiveResult<T> = Result<T, LiveError>;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|secret|authorization)[=:]\s*\S+").expect("valid regex")
});

const MAX_ERROR_LEN: usize = 500;

/// Redact credentials and cap length of error text coming from the network stack
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    if sanitized.len() > MAX_ERROR_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_ERROR_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(suffix);
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(LinkError::transport("connection refused").is_retryable());
        assert!(LinkError::protocol("malformed packet").is_retryable());
        assert!(!LinkError::auth("bad username or password").is_retryable());
        assert!(LinkError::protocol("x").is_protocol());
        assert!(!LinkError::transport("x").is_protocol());
    }

    #[test]
    fn test_credentials_are_redacted() {
        let error = LinkError::auth("rejected token=eyJhbGciOi.secret password: hunter2");
        let text = error.to_string();
        assert!(!text.contains("eyJhbGciOi"));
        assert!(!text.contains("hunter2"));
        assert!(text.contains("token=***"));
        assert!(text.contains("password=***"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.len() <= MAX_ERROR_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_live_error_display() {
        let errors = vec![
            LiveError::Link(LinkError::transport("dns failure")),
            LiveError::Capacity { capacity: 3 },
            LiveError::InvalidTopic(TopicError::Empty),
            LiveError::AttemptsExhausted {
                attempts: 5,
                last_error: LinkError::transport("timeout"),
            },
            LiveError::ConnectTimeout(Duration::from_secs(10)),
            LiveError::Closed,
        ];
        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_link_error_converts() {
        let error: LiveError = LinkError::auth("denied").into();
        assert!(matches!(error, LiveError::Link(LinkError::Auth(_))));
    }
}
