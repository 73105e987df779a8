//! # Synchronization errors

use reqwest::StatusCode;
use shared::models::ChatId;
use thiserror::Error;

/// Result alias for the synchronization layer.
pub type SyncResult<T> = Result<T, SyncError>;

/// Every failure the synchronization layer can surface.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The request never produced a response.
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a non-success status.
    #[error("{endpoint} rejected with {status}{}", .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Status {
        endpoint: String,
        status: StatusCode,
        detail: Option<String>,
    },

    /// The response body did not match the expected schema.
    #[error("unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// The backend reported a failed extraction for a chat. Displays the
    /// backend's message alone.
    #[error("{message}")]
    Extraction { chat_id: ChatId, message: String },

    /// No bearer token is available from the auth session.
    #[error("no authentication token available")]
    MissingToken,

    /// The poll chain ran out of attempts before reaching a terminal state.
    #[error("Maximum polling attempts reached for chat {chat_id} ({attempts})")]
    PollLimit { chat_id: ChatId, attempts: u32 },

    /// The poll chain that started the request was superseded.
    #[error("superseded by a newer poll chain")]
    Cancelled,

    /// A URL could not be built from the configured base.
    #[error("invalid endpoint {path}: {source}")]
    Url {
        path: String,
        #[source]
        source: url::ParseError,
    },
}

impl SyncError {
    /// Whether the error came from the transport rather than the backend's
    /// answer.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http { .. })
            || matches!(self, Self::Status { status, .. } if status.is_server_error())
    }

    /// Whether the backend rejected the credentials.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::MissingToken)
            || matches!(self, Self::Status { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_includes_detail() {
        let error = SyncError::Status {
            endpoint: "/tasks/chat/1/tasks".into(),
            status: StatusCode::NOT_FOUND,
            detail: Some("Chat not found".into()),
        };
        assert_eq!(
            error.to_string(),
            "/tasks/chat/1/tasks rejected with 404 Not Found: Chat not found"
        );
        assert!(!error.is_transient());
        assert!(!error.is_auth());
    }

    #[test]
    fn classifies_server_and_auth_failures() {
        let server = SyncError::Status {
            endpoint: "/x".into(),
            status: StatusCode::BAD_GATEWAY,
            detail: None,
        };
        let auth = SyncError::Status {
            endpoint: "/x".into(),
            status: StatusCode::UNAUTHORIZED,
            detail: None,
        };
        assert!(server.is_transient());
        assert!(auth.is_auth());
        assert!(SyncError::MissingToken.is_auth());
        assert_eq!(server.to_string(), "/x rejected with 502 Bad Gateway");
    }

    #[test]
    fn extraction_failure_shows_the_backend_message() {
        let error = SyncError::Extraction {
            chat_id: ChatId::from(3),
            message: "Telegram session expired".into(),
        };
        assert_eq!(error.to_string(), "Telegram session expired");
        assert!(!error.is_transient());
        assert!(!error.is_auth());
    }
}
