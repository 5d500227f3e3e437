//! Profile repository.

use crate::error::MetadataResult;
use crate::models::ProfileRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for member profiles.
#[async_trait]
pub trait ProfileRepo: Send + Sync {
    /// Create a profile. Fails with `AlreadyExists` on a duplicate id or email.
    async fn create_profile(&self, profile: &ProfileRow) -> MetadataResult<()>;

    /// Get a profile by ID.
    async fn get_profile(&self, profile_id: Uuid) -> MetadataResult<Option<ProfileRow>>;

    /// Get a profile by (normalized) email.
    async fn get_profile_by_email(&self, email: &str) -> MetadataResult<Option<ProfileRow>>;

    /// List all profiles, newest first.
    async fn list_profiles(&self) -> MetadataResult<Vec<ProfileRow>>;

    /// Overwrite the mutable fields of a profile.
    async fn update_profile(&self, profile: &ProfileRow) -> MetadataResult<()>;

    /// Delete a profile.
    async fn delete_profile(&self, profile_id: Uuid) -> MetadataResult<()>;
}
