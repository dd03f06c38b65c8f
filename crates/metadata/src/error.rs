//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Map a unique-constraint violation on insert to `AlreadyExists`.
    ///
    /// SQLite reports "UNIQUE constraint failed: ..." and PostgreSQL uses
    /// SQLSTATE 23505; any other error passes through unchanged.
    pub(crate) fn from_insert(err: sqlx::Error, what: impl FnOnce() -> String) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && (db_err.code().as_deref() == Some("23505")
                || db_err.message().contains("UNIQUE constraint"))
        {
            return MetadataError::AlreadyExists(what());
        }
        MetadataError::Database(err)
    }

    /// Whether this error signals a duplicate key.
    pub fn is_conflict(&self) -> bool {
        matches!(self, MetadataError::AlreadyExists(_))
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
