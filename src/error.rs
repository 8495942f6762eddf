//! Error taxonomy shared by the store and the HTTP layer.

use crate::types::TaskId;
use serde::Serialize;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    TaskNotFound,
    PersistenceError,
}

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    /// Bad input shape or a violated invariant. Client error.
    #[error("{message}")]
    Validation { field: String, message: String },

    /// The referenced task does not exist. Client error.
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// The underlying store failed. Server error, never retried.
    #[error("{0}")]
    Persistence(String),
}

impl PlannerError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::NotFound(_) => ErrorCode::TaskNotFound,
            Self::Persistence(_) => ErrorCode::PersistenceError,
        }
    }

    /// Whether the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Persistence(_))
    }

    /// Structured body for responses.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
            field: match self {
                Self::Validation { field, .. } => Some(field.clone()),
                _ => None,
            },
        }
    }
}

impl From<rusqlite::Error> for PlannerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::persistence(err)
    }
}

impl From<refinery::Error> for PlannerError {
    fn from(err: refinery::Error) -> Self {
        Self::persistence(err)
    }
}

/// Serialized error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Result type for store operations.
pub type PlannerResult<T> = std::result::Result<T, PlannerError>;
