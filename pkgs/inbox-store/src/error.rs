//! Error types for backend operations

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Message fragments that mean the feature is not provisioned for the
/// caller: a missing relation or a denied permission.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "no such table",
    "does not exist",
    "permission denied",
    "42p01",
    "42501",
];

/// Errors surfaced by the backing store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Feature unavailable: {0}")]
    Unavailable(String),
    #[error("Transient backend error: {0}")]
    Transient(String),
    #[error("Query failed: {message}")]
    Query {
        message: String,
        code: Option<String>,
    },
    #[error("Could not decode stored row: {0}")]
    Decode(String),
    #[error("Change feed unavailable")]
    FeedUnavailable,
}

impl BackendError {
    /// Missing table or permission: the caller should treat it as "no data"
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::FeedUnavailable)
    }

    /// Short machine-readable code, when one is known
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Unavailable(_) => Some("unavailable"),
            Self::Transient(_) | Self::FeedUnavailable => Some("transient"),
            Self::Query { code, .. } => code.as_deref(),
            Self::Decode(_) => Some("decode"),
        }
    }
}

impl From<DbErr> for BackendError {
    fn from(err: DbErr) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if UNAVAILABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Self::Unavailable(message);
        }

        let code = match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => Some("unique_violation".to_string()),
            Some(SqlErr::ForeignKeyConstraintViolation(_)) => {
                Some("foreign_key_violation".to_string())
            }
            _ => None,
        };

        match err {
            DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => Self::Transient(message),
            _ => Self::Query { message, code },
        }
    }
}
