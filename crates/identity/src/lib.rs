//! Credential store for Tyler.
//!
//! This crate provides:
//! - Argon2 password hashing and verification
//! - Opaque access/refresh token issuance, stored as SHA-256 hashes
//! - Session lookup, refresh rotation and revocation
//! - Administrative credential management (create, confirm, reset, delete)

pub mod error;
pub mod secret;
pub mod store;

pub use error::{IdentityError, IdentityResult};
pub use store::{
    Credential, CredentialAdmin, CredentialStore, CredentialUpdate, IdentityProvider,
    LocalCredentialStore, NewCredential, Refresh,
};
