//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use tyler_core::{Profile, Ritual, RitualId, Role, UserId};
use uuid::Uuid;

use crate::error::{MetadataError, MetadataResult};

// =============================================================================
// Credentials and sessions
// =============================================================================

/// Email and password credential. The id is the member's identity.
#[derive(Clone, FromRow)]
pub struct CredentialRow {
    pub credential_id: Uuid,
    pub email: String,
    /// PHC-formatted password hash.
    pub password_hash: String,
    pub confirmed: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl std::fmt::Debug for CredentialRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRow")
            .field("credential_id", &self.credential_id)
            .field("email", &self.email)
            .field("password_hash", &"[REDACTED]")
            .field("confirmed", &self.confirmed)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// One issued access/refresh pair. Only token hashes are stored.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: Uuid,
    pub credential_id: Uuid,
    pub access_token_hash: String,
    pub refresh_token_hash: String,
    pub access_expires_at: OffsetDateTime,
    pub refresh_expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
    /// Session issued when this one's refresh token was redeemed.
    pub replaced_by: Option<Uuid>,
}

impl SessionRow {
    /// Access token usable at `now`.
    pub fn access_valid_at(&self, now: OffsetDateTime) -> bool {
        self.revoked_at.is_none() && now < self.access_expires_at
    }

    /// Refresh token usable at `now`.
    pub fn refresh_valid_at(&self, now: OffsetDateTime) -> bool {
        self.revoked_at.is_none() && now < self.refresh_expires_at
    }
}

// =============================================================================
// Profiles
// =============================================================================

/// Profile record. `profile_id` equals the credential id.
#[derive(Debug, Clone, FromRow)]
pub struct ProfileRow {
    pub profile_id: Uuid,
    pub name: String,
    pub email: String,
    pub degree: Option<i32>,
    pub lodge: Option<String>,
    pub role: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ProfileRow {
    /// Convert into the domain type.
    pub fn into_profile(self) -> MetadataResult<Profile> {
        let role = Role::parse(&self.role).map_err(|e| {
            MetadataError::Internal(format!("profile {}: {e}", self.profile_id))
        })?;
        Ok(Profile {
            id: UserId::from_uuid(self.profile_id),
            name: self.name,
            email: self.email,
            degree: self.degree,
            lodge: self.lodge,
            role,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl From<&Profile> for ProfileRow {
    fn from(profile: &Profile) -> Self {
        Self {
            profile_id: *profile.id.as_uuid(),
            name: profile.name.clone(),
            email: profile.email.clone(),
            degree: profile.degree,
            lodge: profile.lodge.clone(),
            role: profile.role.as_str().to_string(),
            created_at: profile.created_at,
            updated_at: profile.updated_at,
        }
    }
}

// =============================================================================
// Rituals
// =============================================================================

/// Ritual document record.
#[derive(Debug, Clone, FromRow)]
pub struct RitualRow {
    pub ritual_id: Uuid,
    pub name: String,
    pub degree: Option<i32>,
    pub ritual_system: String,
    pub language: String,
    pub author: String,
    pub file_url: String,
    pub file_key: Option<String>,
    pub content_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub owner_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<RitualRow> for Ritual {
    fn from(row: RitualRow) -> Self {
        Self {
            id: RitualId::from_uuid(row.ritual_id),
            name: row.name,
            degree: row.degree,
            system: row.ritual_system,
            language: row.language,
            author: row.author,
            file_url: row.file_url,
            file_key: row.file_key,
            content_type: row.content_type,
            size: row.size_bytes,
            owner_id: row.owner_id.map(UserId::from_uuid),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<&Ritual> for RitualRow {
    fn from(ritual: &Ritual) -> Self {
        Self {
            ritual_id: *ritual.id.as_uuid(),
            name: ritual.name.clone(),
            degree: ritual.degree,
            ritual_system: ritual.system.clone(),
            language: ritual.language.clone(),
            author: ritual.author.clone(),
            file_url: ritual.file_url.clone(),
            file_key: ritual.file_key.clone(),
            content_type: ritual.content_type.clone(),
            size_bytes: ritual.size,
            owner_id: ritual.owner_id.map(|id| *id.as_uuid()),
            created_at: ritual.created_at,
            updated_at: ritual.updated_at,
        }
    }
}
