//! Identity error types.

use thiserror::Error;
use tyler_metadata::MetadataError;

/// Credential store errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Unknown email or wrong password. Never says which.
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("account pending approval")]
    PendingApproval,

    #[error("email already registered")]
    EmailTaken,

    #[error("credential not found: {0}")]
    NotFound(String),

    #[error("password must be at least {min} characters")]
    WeakPassword { min: usize },

    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    #[error("password hashing error: {0}")]
    Hashing(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for identity operations.
pub type IdentityResult<T> = std::result::Result<T, IdentityError>;
