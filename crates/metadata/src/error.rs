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

    /// Creating the database directory failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// Map a SQLite unique-constraint failure to `AlreadyExists`.
///
/// SQLite reports e.g. "UNIQUE constraint failed: profiles.email".
pub(crate) fn map_unique_violation(err: sqlx::Error, what: &str) -> MetadataError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.message().contains("UNIQUE constraint")
    {
        let column = db_err
            .message()
            .rsplit('.')
            .next()
            .unwrap_or("key")
            .to_string();
        return MetadataError::AlreadyExists(format!("{what} with this {column} already exists"));
    }
    err.into()
}
