//! Metadata store abstraction and the SQLite implementation for Tyler.
//!
//! This crate provides the persistent data model:
//! - Credentials (email, password hash, confirmation flag)
//! - Sessions issued against credentials, stored as token hashes
//! - Member profiles
//! - Ritual document metadata

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use tyler_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            tracing::info!(path = %path.display(), "opening SQLite metadata store");
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
