use serde::{Deserialize, Serialize};
use serde_json::Value;

const TOKEN_EXPIRED_DETAIL: &str = "Token has expired";

/// Error body returned by the backend (`{"detail": ...}`).
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ErrorResponse {
    /// Human readable detail; validation failures carry a list instead.
    #[serde(default)]
    pub detail: Option<Value>,
}

impl ErrorResponse {
    /// Creates an error response with a plain text detail.
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(Value::String(detail.into())),
        }
    }

    /// Best-effort text form of the detail.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match &self.detail {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    /// Whether the backend rejected the bearer token as expired.
    #[must_use]
    pub fn is_token_expired(&self) -> bool {
        matches!(&self.detail, Some(Value::String(text)) if text == TOKEN_EXPIRED_DETAIL)
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{message}"),
            None => write!(f, "no error detail"),
        }
    }
}

impl std::error::Error for ErrorResponse {}
