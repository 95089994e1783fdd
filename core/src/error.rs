//! Normalized error payload returned by the API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body of a non-2xx API response.
///
/// Every field is optional: the backend sends `message` for most failures,
/// `error` for a few older routes, and `errors` (field -> message) for
/// validation failures. Bodies that are not JSON end up in `message`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Short error code or legacy message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Field-level validation messages.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

impl ErrorBody {
    /// Parse a raw response body.
    ///
    /// JSON bodies are decoded into the known fields (unknown fields are
    /// ignored). Anything else becomes the `message`, and an empty body yields
    /// an empty payload.
    #[must_use]
    pub fn from_bytes(raw: &[u8]) -> Self {
        if let Ok(body) = serde_json::from_slice::<Self>(raw) {
            return body;
        }

        let text = String::from_utf8_lossy(raw).trim().to_string();
        Self {
            message: (!text.is_empty()).then_some(text),
            ..Self::default()
        }
    }

    /// The best human-readable text in this payload, if any.
    #[must_use]
    pub fn best_message(&self) -> Option<&str> {
        self.message.as_deref().or(self.error.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_validation_payload() {
        let body = ErrorBody::from_bytes(
            br#"{"message":"Validation failed","errors":{"email":"Email is required"}}"#,
        );
        assert_eq!(body.best_message(), Some("Validation failed"));
        assert_eq!(body.errors.get("email").map(String::as_str), Some("Email is required"));
    }

    #[test]
    fn test_falls_back_to_error_field() {
        let body = ErrorBody::from_bytes(br#"{"error":"Forbidden"}"#);
        assert_eq!(body.best_message(), Some("Forbidden"));
    }

    #[test]
    fn test_plain_text_body() {
        let body = ErrorBody::from_bytes(b"Bad Gateway\n");
        assert_eq!(body.message.as_deref(), Some("Bad Gateway"));
        assert!(ErrorBody::from_bytes(b"").best_message().is_none());
    }
}
