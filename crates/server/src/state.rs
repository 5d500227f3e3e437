//! Application state shared across handlers.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tyler_core::config::AppConfig;
use tyler_identity::{IdentityProvider, LocalCredentialStore};
use tyler_metadata::MetadataStore;
use tyler_storage::ObjectStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend for ritual binaries.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store (profiles, rituals).
    pub metadata: Arc<dyn MetadataStore>,
    /// Credential store.
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    /// Create state with the local credential store over `metadata`.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let identity: Arc<dyn IdentityProvider> =
            Arc::new(LocalCredentialStore::new(metadata.clone(), &config.auth));
        Self::with_identity(config, storage, metadata, identity)
    }

    /// Create state with an explicit credential store.
    pub fn with_identity(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            identity,
        }
    }

    /// Whether session cookies carry the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.config.server.secure_cookies
    }

    /// Spawn the periodic purge of revoked and expired sessions.
    /// The caller keeps the handle for as long as purging should run.
    pub fn spawn_session_sweeper(&self) -> JoinHandle<()> {
        let identity = self.identity.clone();
        let interval = self.config.auth.session_sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match identity.purge_expired_sessions().await {
                    Ok(0) => tracing::debug!("no sessions to purge"),
                    Ok(purged) => {
                        crate::metrics::SESSIONS_PURGED.inc_by(purged);
                        tracing::info!(purged, "purged expired sessions");
                    }
                    Err(e) => tracing::warn!(error = %e, "session purge failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tyler_identity::NewCredential;
    use tyler_metadata::SqliteStore;
    use tyler_storage::FilesystemBackend;
    use tempfile::tempdir;

    #[tokio::test]
    async fn sweeper_purges_revoked_sessions() {
        let temp = tempdir().unwrap();
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(temp.path().join("storage"), None)
                .await
                .unwrap(),
        );
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(temp.path().join("metadata.db"), None)
                .await
                .unwrap(),
        );

        let mut config = AppConfig::for_testing();
        config.auth.session_sweep_interval_secs = 1;
        let state = AppState::new(config, storage, metadata.clone());

        state
            .identity
            .create_credential(NewCredential {
                email: "sweep@example.org",
                password: "s3cret-pass",
                confirmed: true,
            })
            .await
            .unwrap();
        let session = state
            .identity
            .sign_in("sweep@example.org", "s3cret-pass")
            .await
            .unwrap();
        state.identity.sign_out(&session.access_token).await.unwrap();

        let handle = state.spawn_session_sweeper();
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        handle.abort();

        assert_eq!(state.identity.purge_expired_sessions().await.unwrap(), 0);
    }
}
