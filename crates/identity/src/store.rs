//! Credential store: sign-in, session lifecycle and credential administration.

use std::sync::Arc;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use tyler_core::config::AuthConfig;
use tyler_core::profile::{looks_like_email, normalize_email};
use tyler_core::{Session, UserId, VerifiedSession};
use tyler_metadata::models::{CredentialRow, SessionRow};
use tyler_metadata::{MetadataError, MetadataStore};
use uuid::Uuid;

use crate::error::{IdentityError, IdentityResult};
use crate::secret;

/// Public view of a credential. The password hash never leaves the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: UserId,
    pub email: String,
    pub confirmed: bool,
    pub created_at: OffsetDateTime,
}

impl From<&CredentialRow> for Credential {
    fn from(row: &CredentialRow) -> Self {
        Self {
            id: UserId::from_uuid(row.credential_id),
            email: row.email.clone(),
            confirmed: row.confirmed,
            created_at: row.created_at,
        }
    }
}

/// Result of redeeming a refresh token.
#[derive(Debug, Clone)]
pub enum Refresh {
    /// A new token pair was minted.
    Issued(Session),
    /// The token was redeemed moments ago by a concurrent request. Its
    /// successor session is still live, but its raw tokens went to the
    /// winning request.
    Superseded(VerifiedSession),
    /// Unknown, expired, revoked, or spent outside the reuse window.
    Rejected,
}

/// Bound on successor hops followed for a spent refresh token.
const MAX_SUCCESSOR_HOPS: usize = 4;

/// Input for creating a credential.
pub struct NewCredential<'a> {
    pub email: &'a str,
    pub password: &'a str,
    /// Unconfirmed credentials cannot sign in.
    pub confirmed: bool,
}

/// Partial credential update. `None` leaves a field untouched.
#[derive(Debug, Default, Clone)]
pub struct CredentialUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
    pub confirmed: Option<bool>,
}

impl CredentialUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.password.is_none() && self.confirmed.is_none()
    }
}

/// Sign-in and session lifecycle.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Exchange email and password for a new session.
    async fn sign_in(&self, email: &str, password: &str) -> IdentityResult<Session>;

    /// Revoke the session identified by either of its tokens.
    ///
    /// Unknown or already revoked tokens are not an error.
    async fn sign_out(&self, token: &str) -> IdentityResult<()>;

    /// Resolve an access token. `None` when unknown, revoked or expired.
    async fn get_session(&self, access_token: &str) -> IdentityResult<Option<VerifiedSession>>;

    /// Redeem a refresh token for a new token pair.
    ///
    /// A refresh token is single-use; the old pair is revoked atomically.
    /// Presenting it again within the reuse window yields
    /// [`Refresh::Superseded`] instead of a second pair.
    async fn refresh_session(&self, refresh_token: &str) -> IdentityResult<Refresh>;
}

/// Administrative operations over credentials.
#[async_trait]
pub trait CredentialAdmin: Send + Sync {
    async fn create_credential(&self, new: NewCredential<'_>) -> IdentityResult<Credential>;

    async fn get_credential(&self, id: UserId) -> IdentityResult<Option<Credential>>;

    async fn update_credential(
        &self,
        id: UserId,
        update: &CredentialUpdate,
    ) -> IdentityResult<Credential>;

    /// Delete a credential together with its sessions.
    async fn delete_credential(&self, id: UserId) -> IdentityResult<()>;

    /// Revoke every live session of a credential.
    async fn revoke_sessions(&self, id: UserId) -> IdentityResult<u64>;

    /// Drop revoked and fully expired sessions.
    async fn purge_expired_sessions(&self) -> IdentityResult<u64>;

    /// Minimum accepted password length.
    fn min_password_length(&self) -> usize;
}

/// Everything the server needs from an identity backend.
pub trait IdentityProvider: CredentialStore + CredentialAdmin {}

impl<T: CredentialStore + CredentialAdmin> IdentityProvider for T {}

/// Credential store backed by the metadata database.
pub struct LocalCredentialStore {
    metadata: Arc<dyn MetadataStore>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    reuse_grace: Duration,
    min_password_length: usize,
}

impl LocalCredentialStore {
    pub fn new(metadata: Arc<dyn MetadataStore>, auth: &AuthConfig) -> Self {
        Self {
            metadata,
            access_ttl: auth.access_token_ttl(),
            refresh_ttl: auth.refresh_token_ttl(),
            reuse_grace: auth.refresh_reuse_grace(),
            min_password_length: auth.min_password_length,
        }
    }

    fn check_password(&self, password: &str) -> IdentityResult<()> {
        if password.chars().count() < self.min_password_length {
            return Err(IdentityError::WeakPassword {
                min: self.min_password_length,
            });
        }
        Ok(())
    }

    /// Mint a token pair. Returns the raw session and the row to persist.
    fn mint(&self, credential_id: Uuid, now: OffsetDateTime) -> (Session, SessionRow) {
        let access_token = secret::generate_token();
        let refresh_token = secret::generate_token();
        let row = SessionRow {
            session_id: Uuid::new_v4(),
            credential_id,
            access_token_hash: secret::hash_token(&access_token),
            refresh_token_hash: secret::hash_token(&refresh_token),
            access_expires_at: now + self.access_ttl,
            refresh_expires_at: now + self.refresh_ttl,
            created_at: now,
            revoked_at: None,
            replaced_by: None,
        };
        let session = Session {
            access_token,
            refresh_token,
            expires_at: row.access_expires_at,
            subject_id: UserId::from_uuid(credential_id),
        };
        (session, row)
    }

    /// Follow the rotation chain of a spent session to a live successor,
    /// as long as every hop was rotated within the reuse window.
    async fn live_successor(
        &self,
        mut spent: SessionRow,
        now: OffsetDateTime,
    ) -> IdentityResult<Option<VerifiedSession>> {
        for _ in 0..MAX_SUCCESSOR_HOPS {
            let (Some(revoked_at), Some(next)) = (spent.revoked_at, spent.replaced_by) else {
                return Ok(None);
            };
            if now - revoked_at > self.reuse_grace {
                return Ok(None);
            }
            let Some(successor) = self.metadata.get_session_by_id(next).await? else {
                return Ok(None);
            };
            if successor.access_valid_at(now) {
                return Ok(Some(VerifiedSession {
                    session_id: successor.session_id,
                    subject_id: UserId::from_uuid(successor.credential_id),
                    expires_at: successor.access_expires_at,
                }));
            }
            spent = successor;
        }
        Ok(None)
    }

    async fn load(&self, id: UserId) -> IdentityResult<CredentialRow> {
        self.metadata
            .get_credential(*id.as_uuid())
            .await?
            .ok_or_else(|| IdentityError::NotFound(id.to_string()))
    }
}

async fn hash_blocking(password: String) -> IdentityResult<String> {
    tokio::task::spawn_blocking(move || secret::hash_password(&password))
        .await
        .map_err(|e| IdentityError::Internal(format!("hashing task failed: {e}")))?
}

async fn verify_blocking(password: String, phc: Option<String>) -> IdentityResult<bool> {
    tokio::task::spawn_blocking(move || match phc {
        Some(phc) => secret::verify_password(&password, &phc),
        None => {
            secret::verify_decoy(&password);
            false
        }
    })
    .await
    .map_err(|e| IdentityError::Internal(format!("verification task failed: {e}")))
}

fn map_email_conflict(err: MetadataError) -> IdentityError {
    match err {
        MetadataError::AlreadyExists(_) => IdentityError::EmailTaken,
        other => IdentityError::Metadata(other),
    }
}

#[async_trait]
impl CredentialStore for LocalCredentialStore {
    async fn sign_in(&self, email: &str, password: &str) -> IdentityResult<Session> {
        let email = normalize_email(email);
        let row = self.metadata.get_credential_by_email(&email).await?;

        let verified =
            verify_blocking(password.to_string(), row.as_ref().map(|r| r.password_hash.clone()))
                .await?;
        let row = match row {
            Some(row) if verified => row,
            _ => {
                debug!(email = %email, "sign-in rejected");
                return Err(IdentityError::InvalidCredentials);
            }
        };

        if !row.confirmed {
            return Err(IdentityError::PendingApproval);
        }

        let (session, session_row) = self.mint(row.credential_id, OffsetDateTime::now_utc());
        self.metadata.create_session(&session_row).await?;
        info!(subject = %session.subject_id, "session issued");
        Ok(session)
    }

    async fn sign_out(&self, token: &str) -> IdentityResult<()> {
        let hash = secret::hash_token(token);
        let row = match self.metadata.get_session_by_access_hash(&hash).await? {
            Some(row) => Some(row),
            None => self.metadata.get_session_by_refresh_hash(&hash).await?,
        };
        if let Some(row) = row {
            self.metadata
                .revoke_session(row.session_id, OffsetDateTime::now_utc())
                .await?;
            debug!(session_id = %row.session_id, "session revoked");
        }
        Ok(())
    }

    async fn get_session(&self, access_token: &str) -> IdentityResult<Option<VerifiedSession>> {
        let hash = secret::hash_token(access_token);
        let Some(row) = self.metadata.get_session_by_access_hash(&hash).await? else {
            return Ok(None);
        };
        if !row.access_valid_at(OffsetDateTime::now_utc()) {
            return Ok(None);
        }
        Ok(Some(VerifiedSession {
            session_id: row.session_id,
            subject_id: UserId::from_uuid(row.credential_id),
            expires_at: row.access_expires_at,
        }))
    }

    async fn refresh_session(&self, refresh_token: &str) -> IdentityResult<Refresh> {
        let hash = secret::hash_token(refresh_token);
        let Some(old) = self.metadata.get_session_by_refresh_hash(&hash).await? else {
            return Ok(Refresh::Rejected);
        };
        let now = OffsetDateTime::now_utc();
        if now >= old.refresh_expires_at {
            return Ok(Refresh::Rejected);
        }

        let spent = if old.revoked_at.is_some() {
            old
        } else {
            let (session, replacement) = self.mint(old.credential_id, now);
            match self
                .metadata
                .rotate_session(old.session_id, now, &replacement)
                .await
            {
                Ok(()) => return Ok(Refresh::Issued(session)),
                // Lost a race with a concurrent redemption of the same token.
                Err(MetadataError::Constraint(_)) => {
                    match self.metadata.get_session_by_id(old.session_id).await? {
                        Some(row) => row,
                        None => return Ok(Refresh::Rejected),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        };

        match self.live_successor(spent.clone(), now).await? {
            Some(successor) => {
                debug!(
                    session_id = %spent.session_id,
                    successor = %successor.session_id,
                    "spent refresh token resolved to its successor"
                );
                Ok(Refresh::Superseded(successor))
            }
            None => {
                warn!(session_id = %spent.session_id, "spent refresh token presented");
                Ok(Refresh::Rejected)
            }
        }
    }
}

#[async_trait]
impl CredentialAdmin for LocalCredentialStore {
    async fn create_credential(&self, new: NewCredential<'_>) -> IdentityResult<Credential> {
        let email = normalize_email(new.email);
        if !looks_like_email(&email) {
            return Err(IdentityError::InvalidEmail(email));
        }
        self.check_password(new.password)?;

        let password_hash = hash_blocking(new.password.to_string()).await?;
        let now = OffsetDateTime::now_utc();
        let row = CredentialRow {
            credential_id: Uuid::new_v4(),
            email,
            password_hash,
            confirmed: new.confirmed,
            created_at: now,
            updated_at: now,
        };
        self.metadata
            .create_credential(&row)
            .await
            .map_err(map_email_conflict)?;
        info!(credential_id = %row.credential_id, confirmed = row.confirmed, "credential created");
        Ok(Credential::from(&row))
    }

    async fn get_credential(&self, id: UserId) -> IdentityResult<Option<Credential>> {
        let row = self.metadata.get_credential(*id.as_uuid()).await?;
        Ok(row.as_ref().map(Credential::from))
    }

    async fn update_credential(
        &self,
        id: UserId,
        update: &CredentialUpdate,
    ) -> IdentityResult<Credential> {
        let mut row = self.load(id).await?;

        if let Some(email) = &update.email {
            let email = normalize_email(email);
            if !looks_like_email(&email) {
                return Err(IdentityError::InvalidEmail(email));
            }
            row.email = email;
        }
        if let Some(password) = &update.password {
            self.check_password(password)?;
            row.password_hash = hash_blocking(password.clone()).await?;
        }
        if let Some(confirmed) = update.confirmed {
            row.confirmed = confirmed;
        }
        row.updated_at = OffsetDateTime::now_utc();

        self.metadata
            .update_credential(&row)
            .await
            .map_err(map_email_conflict)?;

        // Suspending an account ends its sessions.
        if update.confirmed == Some(false) {
            self.metadata
                .revoke_sessions_for_credential(row.credential_id, row.updated_at)
                .await?;
        }
        Ok(Credential::from(&row))
    }

    async fn delete_credential(&self, id: UserId) -> IdentityResult<()> {
        match self.metadata.delete_credential(*id.as_uuid()).await {
            Ok(()) => Ok(()),
            Err(MetadataError::NotFound(_)) => Err(IdentityError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn revoke_sessions(&self, id: UserId) -> IdentityResult<u64> {
        let count = self
            .metadata
            .revoke_sessions_for_credential(*id.as_uuid(), OffsetDateTime::now_utc())
            .await?;
        Ok(count)
    }

    async fn purge_expired_sessions(&self) -> IdentityResult<u64> {
        let purged = self
            .metadata
            .purge_sessions(OffsetDateTime::now_utc())
            .await?;
        Ok(purged)
    }

    fn min_password_length(&self) -> usize {
        self.min_password_length
    }
}
