//! Ritual repository.

use crate::error::MetadataResult;
use crate::models::RitualRow;
use async_trait::async_trait;
use tyler_core::RitualFilter;
use uuid::Uuid;

/// Repository for ritual document metadata.
#[async_trait]
pub trait RitualRepo: Send + Sync {
    /// Create a ritual record.
    async fn create_ritual(&self, ritual: &RitualRow) -> MetadataResult<()>;

    /// Get a ritual by ID.
    async fn get_ritual(&self, ritual_id: Uuid) -> MetadataResult<Option<RitualRow>>;

    /// List rituals matching the filter, newest first.
    async fn list_rituals(&self, filter: &RitualFilter) -> MetadataResult<Vec<RitualRow>>;

    /// Delete a ritual record.
    async fn delete_ritual(&self, ritual_id: Uuid) -> MetadataResult<()>;

    /// Forget the uploader of every ritual owned by a member. Returns how many.
    async fn clear_ritual_owner(&self, owner_id: Uuid) -> MetadataResult<u64>;
}
