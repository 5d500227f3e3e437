//! Credential and session repository.

use crate::error::MetadataResult;
use crate::models::{CredentialRow, SessionRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for credentials and the sessions issued against them.
#[async_trait]
pub trait CredentialRepo: Send + Sync {
    /// Create a credential. Fails with `AlreadyExists` on a duplicate email.
    async fn create_credential(&self, credential: &CredentialRow) -> MetadataResult<()>;

    /// Get a credential by ID.
    async fn get_credential(&self, credential_id: Uuid) -> MetadataResult<Option<CredentialRow>>;

    /// Get a credential by (normalized) email.
    async fn get_credential_by_email(&self, email: &str)
    -> MetadataResult<Option<CredentialRow>>;

    /// Overwrite email, password hash and confirmation flag.
    async fn update_credential(&self, credential: &CredentialRow) -> MetadataResult<()>;

    /// Delete a credential and, by cascade, its sessions.
    async fn delete_credential(&self, credential_id: Uuid) -> MetadataResult<()>;

    /// Store a newly issued session.
    async fn create_session(&self, session: &SessionRow) -> MetadataResult<()>;

    /// Look up a session by id.
    async fn get_session_by_id(&self, session_id: Uuid) -> MetadataResult<Option<SessionRow>>;

    /// Look up a session by the hash of its access token.
    async fn get_session_by_access_hash(&self, hash: &str) -> MetadataResult<Option<SessionRow>>;

    /// Look up a session by the hash of its refresh token.
    async fn get_session_by_refresh_hash(&self, hash: &str)
    -> MetadataResult<Option<SessionRow>>;

    /// Revoke one session. Revoking twice is a no-op.
    async fn revoke_session(&self, session_id: Uuid, revoked_at: OffsetDateTime)
    -> MetadataResult<()>;

    /// Atomically revoke `old_session_id`, point it at `replacement` and
    /// store `replacement`.
    ///
    /// Fails with `Constraint` if the old session was already revoked, so a
    /// refresh token can be redeemed at most once.
    async fn rotate_session(
        &self,
        old_session_id: Uuid,
        revoked_at: OffsetDateTime,
        replacement: &SessionRow,
    ) -> MetadataResult<()>;

    /// Revoke every live session of a credential. Returns how many.
    async fn revoke_sessions_for_credential(
        &self,
        credential_id: Uuid,
        revoked_at: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Delete revoked sessions and sessions whose refresh token expired.
    async fn purge_sessions(&self, now: OffsetDateTime) -> MetadataResult<u64>;
}
