// SPDX-License-Identifier: GPL-3.0-or-later
use sqlx::error::ErrorKind;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures surfaced by the request store and the catalog index.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An update or lookup targeted a record that does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// The stored version moved on since the caller read the record.
    #[error("concurrent update on {0}")]
    Conflict(String),

    /// The store could not be reached, even after reconnecting.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A stored row could not be decoded into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) => match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => Self::Constraint(db.message().to_string()),
                _ => Self::Database(sqlx::Error::Database(db)),
            },
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_) => Self::Unavailable(err.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => Self::Corrupt(err.to_string()),
            other => Self::Database(other),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

impl From<uuid::Error> for StoreError {
    fn from(err: uuid::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

impl From<chrono::ParseError> for StoreError {
    fn from(err: chrono::ParseError) -> Self {
        Self::Corrupt(err.to_string())
    }
}
