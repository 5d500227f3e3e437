//! Server test utilities.

use std::sync::Arc;

use tempfile::TempDir;
use tyler_core::config::{AppConfig, MetadataConfig, StorageConfig};
use tyler_metadata::{MetadataStore, SqliteStore};
use tyler_server::bootstrap::ensure_seed_admin;
use tyler_server::{AppState, create_router};
use tyler_storage::{FilesystemBackend, ObjectStore};

/// Seed administrator from `AdminConfig::for_testing`.
#[allow(dead_code)]
pub const ADMIN_EMAIL: &str = "admin@example.org";
#[allow(dead_code)]
pub const ADMIN_PASSWORD: &str = "admin-password";

/// Router plus state over a throwaway storage root and SQLite file.
/// `#[allow(dead_code)]`: every test binary compiles `common/` on its own.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Default test configuration with the seed admin in place.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Adjust the test configuration before the state is built.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("tempdir");

        let storage_path = temp_dir.path().join("storage");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path, None)
                .await
                .expect("filesystem object store"),
        );

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("sqlite metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem {
            path: storage_path,
            public_base_url: None,
        };
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };
        modifier(&mut config);

        let state = AppState::new(config, storage, metadata);
        ensure_seed_admin(
            state.identity.as_ref(),
            state.metadata.as_ref(),
            state.config.admin.as_ref(),
        )
        .await
        .expect("seed administrator");

        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }
}
