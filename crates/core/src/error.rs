//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("invalid degree: {0} (must be at least 1)")]
    InvalidDegree(i64),

    #[error("invalid grouping: {0}")]
    InvalidGrouping(String),

    #[error("validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
