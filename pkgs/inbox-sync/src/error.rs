use inbox_store::BackendError;
use thiserror::Error;

/// Errors returned to inbox callers
///
/// Backend failures are normalized into a message and an optional code so
/// callers never see the store's own error shapes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InboxError {
    #[error("Messaging is temporarily unavailable, please try again: {0}")]
    Retryable(String),

    #[error("{message}")]
    Backend {
        message: String,
        code: Option<String>,
    },

    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Only conversation admins can {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Inbox session has been disposed")]
    Disposed,
}

impl InboxError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Retryable(_) => Some("retryable"),
            Self::Backend { code, .. } => code.as_deref(),
            Self::NotFound(_) => Some("not_found"),
            Self::Forbidden(_) => Some("forbidden"),
            Self::InvalidRequest(_) => Some("invalid_request"),
            Self::Disposed => Some("disposed"),
        }
    }
}

impl From<BackendError> for InboxError {
    fn from(err: BackendError) -> Self {
        if err.is_transient() {
            return Self::Retryable(err.to_string());
        }
        Self::Backend {
            code: err.code().map(str::to_string),
            message: err.to_string(),
        }
    }
}
