//! Database-specific error type, kept narrow so callers don't have to match
//! on `sqlx::Error` variants directly.

use thiserror::Error;

/// Errors surfaced by the Persistence Gateway (see `crate::db::handlers`).
#[derive(Error, Debug)]
pub enum DbError {
    /// Entity not found by the given identifier.
    #[error("entity not found")]
    NotFound,

    /// A status mutation was attempted that the status machine disallows
    /// (spec.md §4.4 `UpdateRequestInfoStatus`: terminal→terminal is illegal).
    #[error("illegal status transition from {from:?} to {to:?}")]
    IllegalTransition { from: String, to: String },

    /// Unique constraint violation, e.g. a duplicate `(request_id, index)`.
    #[error("unique constraint violation")]
    UniqueViolation { constraint: Option<String>, table: Option<String>, message: String },

    /// Catch-all for non-recoverable database errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => DbError::UniqueViolation {
                constraint: db_err.constraint().map(|s| s.to_string()),
                table: db_err.table().map(|s| s.to_string()),
                message: db_err.message().to_string(),
            },
            _ => DbError::Other(anyhow::Error::from(err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
