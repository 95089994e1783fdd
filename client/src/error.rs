//! Error types for the LMS API client.
//!
//! Transport failures are normalized once, here, into [`ClientError`]. Page-level
//! code only ever looks at the status, the [`ErrorBody`] and the [`ErrorKind`]
//! classification; it never sees `reqwest` internals.

use lms_core::ErrorBody;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the LMS API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// The request did not complete within the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// Connection-level failure (DNS, refused, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// The API answered with a non-2xx status.
    #[error("API error (status {status}): {}", .body.best_message().unwrap_or("request failed"))]
    Http {
        /// HTTP status code
        status: u16,
        /// Normalized error payload
        body: ErrorBody,
    },

    /// The API answered 429.
    #[error("Rate limited - too many requests")]
    RateLimited {
        /// Cooldown announced by the server (`Retry-After`), if any
        retry_after: Option<Duration>,
        /// Normalized error payload
        body: ErrorBody,
    },

    /// The session could not be recovered and has been torn down.
    #[error("Session expired - sign in again")]
    SessionExpired,

    /// A 2xx response body could not be decoded.
    #[error("Response parsing failed: {0}")]
    Decode(String),

    /// The request could not be built (bad body, bad header value).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invariant violation inside the client.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification that drives retry and UI behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeout or connection failure; retried by the query layer.
    Transient,
    /// 401 that could not be recovered; requires signing in again.
    AuthExpired,
    /// Client-side input problem; requires user correction.
    Validation,
    /// 429; submission disabled until the cooldown elapses.
    RateLimited,
    /// 5xx; retried by the query layer, optimistic writes roll back.
    Server,
    /// Anything else (403, 404, decode failures).
    Other,
}

impl ClientError {
    /// Build an error from a non-2xx response.
    #[must_use]
    pub fn from_response(status: u16, headers: &HeaderMap, raw_body: &[u8]) -> Self {
        let body = ErrorBody::from_bytes(raw_body);
        if status == 429 {
            return Self::RateLimited {
                retry_after: parse_retry_after(headers),
                body,
            };
        }
        Self::Http { status, body }
    }

    /// HTTP status, if the server answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Normalized error payload, if the server sent one.
    #[must_use]
    pub const fn body(&self) -> Option<&ErrorBody> {
        match self {
            Self::Http { body, .. } | Self::RateLimited { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout | Self::Network(_) => ErrorKind::Transient,
            Self::SessionExpired => ErrorKind::AuthExpired,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Http { status: 401, .. } => ErrorKind::AuthExpired,
            Self::Http { status, .. } if *status >= 500 => ErrorKind::Server,
            Self::Http { status, body }
                if matches!(*status, 400 | 409 | 422) || !body.errors.is_empty() =>
            {
                ErrorKind::Validation
            }
            Self::Http { .. } | Self::Decode(_) | Self::InvalidRequest(_) | Self::Internal(_) => {
                ErrorKind::Other
            }
        }
    }

    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Server)
    }

    /// Per-field validation messages (empty when there are none).
    #[must_use]
    pub fn field_errors(&self) -> BTreeMap<String, String> {
        self.body().map(|body| body.errors.clone()).unwrap_or_default()
    }

    /// Human-readable message suitable for a toast or error banner.
    #[must_use]
    pub fn message(&self) -> String {
        if let Some(message) = self.body().and_then(ErrorBody::best_message) {
            return message.to_string();
        }

        match self.kind() {
            ErrorKind::Transient => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            ErrorKind::AuthExpired => "Your session has expired. Please sign in again.".to_string(),
            ErrorKind::Validation => "Please check the highlighted fields.".to_string(),
            ErrorKind::RateLimited => match self {
                Self::RateLimited {
                    retry_after: Some(wait),
                    ..
                } => format!("Too many attempts. Try again in {} seconds.", wait.as_secs().max(1)),
                _ => "Too many attempts. Please wait a moment and try again.".to_string(),
            },
            ErrorKind::Server => "Something went wrong on our side. Please try again.".to_string(),
            ErrorKind::Other => "Request failed.".to_string(),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
