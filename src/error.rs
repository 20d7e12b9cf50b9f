//! Error taxonomy of the lending services.

use serde_json::json;
use shelf_db::StoreError;
use shelf_http::error::AppError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LendingError {
    /// Bad input shape or range; never retried.
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Transient infrastructure fault; the caller may retry.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Stored data contradicts itself.
    #[error("integrity violation: {0}")]
    Integrity(String),
}

impl LendingError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}

pub type LendingResult<T> = Result<T, LendingError>;

impl From<StoreError> for LendingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => Self::StorageUnavailable(message),
            StoreError::Duplicate { entity, key } => {
                Self::Conflict(format!("{entity} already exists: {key}"))
            }
            StoreError::NotFound { entity, key } => Self::NotFound(format!("{entity} not found: {key}")),
            StoreError::Corrupt { entity, message } => {
                Self::Integrity(format!("corrupt {entity}: {message}"))
            }
        }
    }
}

impl From<LendingError> for AppError {
    fn from(err: LendingError) -> Self {
        match err {
            LendingError::Validation { field, message } => AppError::validation(
                vec![json!({ "field": field, "error": message })],
                format!("invalid {field}: {message}"),
            ),
            LendingError::NotFound(message) => AppError::not_found(message),
            LendingError::Conflict(message) => AppError::conflict(Vec::new(), message),
            LendingError::StorageUnavailable(message) => AppError::unavailable(message),
            LendingError::Integrity(message) => {
                AppError::Internal(anyhow::anyhow!("integrity violation: {message}"))
            }
        }
    }
}
