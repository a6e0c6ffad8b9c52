//! Typed errors for the provider transport, with retry classification.

use std::time::Duration;

use thiserror::Error;

/// Broad classification of a transport failure, used to drive retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// HTTP 429 or provider-signalled throttling.
    RateLimited,
    /// HTTP 5xx.
    ServerError,
    /// HTTP 4xx other than 429.
    ClientError,
    /// Connection, DNS, or timeout failure before a response arrived.
    NetworkError,
    /// Response arrived but could not be decoded.
    ParseError,
    /// The provider rejected the prompt for size.
    ContextTooLarge,
    /// Credential resolution failed before the request could be sent.
    Credential,
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LlmErrorKind::RateLimited => "rate-limited",
            LlmErrorKind::ServerError => "server error",
            LlmErrorKind::ClientError => "client error",
            LlmErrorKind::NetworkError => "network error",
            LlmErrorKind::ParseError => "parse error",
            LlmErrorKind::ContextTooLarge => "context too large",
            LlmErrorKind::Credential => "credential error",
        };
        f.write_str(s)
    }
}

/// A provider transport error.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    /// HTTP status, when one was received.
    pub status: Option<u16>,
    /// Server-suggested wait before retrying (Retry-After).
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: LlmErrorKind::RateLimited,
            message: message.into(),
            status: Some(429),
            retry_after,
        }
    }

    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::ServerError,
            message: message.into(),
            status: Some(status),
            retry_after: None,
        }
    }

    pub fn client_error(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::ClientError,
            message: message.into(),
            status: Some(status),
            retry_after: None,
        }
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::NetworkError,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::ParseError,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    pub fn context_too_large(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::ContextTooLarge,
            message: message.into(),
            status: Some(400),
            retry_after: None,
        }
    }

    pub fn credential(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::Credential,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    /// Delay to wait before the given retry attempt (0-indexed).
    ///
    /// Prefers the server's Retry-After when present, otherwise exponential
    /// backoff with jitter.
    pub fn suggested_delay(&self, attempt: u32, config: &RetryConfig) -> Duration {
        if let Some(after) = self.retry_after {
            return after.min(config.max_delay);
        }
        let exp = config
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp.min(config.max_delay);
        // Up to 25% jitter so concurrent clients do not retry in lockstep.
        use rand::Rng;
        let jitter_ms = (capped.as_millis() as u64 / 4).max(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms));
        capped + jitter
    }
}

/// Classify an HTTP status into an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        500..=599 => LlmErrorKind::ServerError,
        _ => LlmErrorKind::ClientError,
    }
}

/// Retry policy for the provider transport.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Hard cap on total time spent retrying one request.
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_retry_duration: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// Whether an error is worth retrying at all.
    pub fn should_retry(&self, error: &LlmError) -> bool {
        matches!(
            error.kind,
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::NetworkError
        )
    }
}
