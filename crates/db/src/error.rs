use thiserror::Error;

/// Failures surfaced by a storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached or the operation did not complete.
    /// Nothing was applied; the caller may retry.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A unique index rejected the write.
    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// The row targeted by an update does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A stored row could not be decoded.
    #[error("corrupt {entity} row: {message}")]
    Corrupt {
        entity: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn duplicate(entity: &'static str, key: impl Into<String>) -> Self {
        Self::Duplicate {
            entity,
            key: key.into(),
        }
    }

    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn corrupt(entity: &'static str, message: impl Into<String>) -> Self {
        Self::Corrupt {
            entity,
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Self::Duplicate {
                entity: "row",
                key: db_err.constraint().unwrap_or("unique").to_string(),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::corrupt("row", err.to_string())
            }
            _ => Self::Unavailable(err.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
