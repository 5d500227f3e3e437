//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, restrict this endpoint to the scraper at the
    /// infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// Include internal error text in error responses. Never enable in
    /// production.
    #[serde(default)]
    pub expose_error_detail: bool,
    /// Mark session cookies `Secure` (serve over HTTPS only).
    #[serde(default)]
    pub secure_cookies: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_upload_size() -> u64 {
    50 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            max_upload_size: default_max_upload_size(),
            expose_error_detail: false,
            secure_cookies: false,
        }
    }
}

/// Credential and session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Access token lifetime in seconds.
    #[serde(default = "default_access_token_ttl_secs")]
    pub access_token_ttl_secs: u64,
    /// Refresh token lifetime in seconds.
    #[serde(default = "default_refresh_token_ttl_secs")]
    pub refresh_token_ttl_secs: u64,
    /// Minimum accepted password length.
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
    /// Length of generated temporary passwords.
    #[serde(default = "default_temporary_password_length")]
    pub temporary_password_length: usize,
    /// How often expired and revoked sessions are purged, in seconds.
    #[serde(default = "default_session_sweep_interval_secs")]
    pub session_sweep_interval_secs: u64,
    /// Seconds after a rotation during which the spent refresh token still
    /// resolves to its successor session. Zero disables reuse.
    #[serde(default = "default_refresh_reuse_grace_secs")]
    pub refresh_reuse_grace_secs: u64,
}

fn default_access_token_ttl_secs() -> u64 {
    3600
}

fn default_refresh_token_ttl_secs() -> u64 {
    30 * 24 * 3600
}

fn default_min_password_length() -> usize {
    6
}

fn default_temporary_password_length() -> usize {
    8
}

fn default_session_sweep_interval_secs() -> u64 {
    600
}

fn default_refresh_reuse_grace_secs() -> u64 {
    10
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_ttl_secs: default_access_token_ttl_secs(),
            refresh_token_ttl_secs: default_refresh_token_ttl_secs(),
            min_password_length: default_min_password_length(),
            temporary_password_length: default_temporary_password_length(),
            session_sweep_interval_secs: default_session_sweep_interval_secs(),
            refresh_reuse_grace_secs: default_refresh_reuse_grace_secs(),
        }
    }
}

impl AuthConfig {
    /// Access token lifetime.
    pub fn access_token_ttl(&self) -> Duration {
        Duration::seconds(self.access_token_ttl_secs as i64)
    }

    /// Refresh token lifetime.
    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::seconds(self.refresh_token_ttl_secs as i64)
    }

    /// Window in which a spent refresh token resolves to its successor.
    pub fn refresh_reuse_grace(&self) -> Duration {
        Duration::seconds(self.refresh_reuse_grace_secs as i64)
    }

    /// Interval of the expired session sweep.
    pub fn session_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_sweep_interval_secs)
    }

    /// Validate auth configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.access_token_ttl_secs == 0 || self.refresh_token_ttl_secs == 0 {
            return Err("auth token lifetimes must be greater than zero".to_string());
        }
        if self.refresh_token_ttl_secs < self.access_token_ttl_secs {
            return Err(
                "auth.refresh_token_ttl_secs must not be shorter than access_token_ttl_secs"
                    .to_string(),
            );
        }
        if self.session_sweep_interval_secs == 0 {
            return Err("auth.session_sweep_interval_secs must be greater than zero".to_string());
        }
        if self.temporary_password_length < self.min_password_length {
            return Err(
                "auth.temporary_password_length must be at least min_password_length".to_string(),
            );
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage, served by the server under `/files/`.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
        /// Origin prepended to `/files/{key}` in public URLs (e.g.
        /// "https://archive.example.org"). Relative URLs when unset.
        #[serde(default)]
        public_base_url: Option<String>,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// Access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// Secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key` instead of `bucket.endpoint/key`).
        /// Required for MinIO and some S3-compatible services. Defaults to false.
        #[serde(default)]
        force_path_style: bool,
        /// Public origin for objects (CDN or public bucket URL). Derived from
        /// endpoint and bucket when unset.
        #[serde(default)]
        public_base_url: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
            public_base_url: None,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            _ => Ok(()),
        }
    }
}

/// Metadata store configuration. Credentials, sessions, profiles and
/// rituals live in the same database, in separate tables.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only: slow queries are logged,
        /// not cancelled).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// Seed administrator ensured at startup.
#[derive(Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_email")]
    pub email: String,
    #[serde(default = "default_admin_name")]
    pub name: String,
    /// Initial password. Only needed when the credential does not exist yet.
    /// WARNING: Prefer the TYLER_ADMIN__PASSWORD env var over storing it in config.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_admin_degree")]
    pub degree: i32,
    #[serde(default = "default_admin_lodge")]
    pub lodge: String,
}

fn default_admin_email() -> String {
    "admin@tyler.local".to_string()
}

fn default_admin_name() -> String {
    "Administrator".to_string()
}

fn default_admin_degree() -> i32 {
    33
}

fn default_admin_lodge() -> String {
    "Admin".to_string()
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("degree", &self.degree)
            .field("lodge", &self.lodge)
            .finish()
    }
}

impl AdminConfig {
    /// Create a test configuration.
    ///
    /// **For testing only.** The password is public.
    pub fn for_testing() -> Self {
        Self {
            email: "admin@example.org".to_string(),
            name: default_admin_name(),
            password: Some("admin-password".to_string()),
            degree: default_admin_degree(),
            lodge: default_admin_lodge(),
        }
    }

    /// Validate admin configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if !crate::profile::looks_like_email(&self.email) {
            return Err(format!("admin.email is not a valid address: {}", self.email));
        }
        if self.degree < crate::MIN_DEGREE {
            return Err("admin.degree must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Credential and session settings.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Seed administrator (optional).
    pub admin: Option<AdminConfig>,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// and a seed admin with a known password.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                expose_error_detail: true,
                ..ServerConfig::default()
            },
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            admin: Some(AdminConfig::for_testing()),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.auth.validate()?;
        self.storage.validate()?;
        if let Some(admin) = &self.admin {
            admin.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert!(config.metrics_enabled);
        assert!(!config.expose_error_detail);
        assert!(!config.secure_cookies);
        assert_eq!(config.max_upload_size, 50 * 1024 * 1024);
    }

    #[test]
    fn test_auth_config_deserialize_defaults() {
        let config: AuthConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.access_token_ttl_secs, 3600);
        assert_eq!(config.min_password_length, 6);
        assert_eq!(config.temporary_password_length, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auth_config_rejects_zero_ttl() {
        let config = AuthConfig {
            access_token_ttl_secs: 0,
            ..AuthConfig::default()
        };
        assert!(config.validate().is_err());

        let inverted = AuthConfig {
            access_token_ttl_secs: 7200,
            refresh_token_ttl_secs: 60,
            ..AuthConfig::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_storage_config_s3_roundtrip_with_public_base() {
        let config = StorageConfig::S3 {
            bucket: "rituals".to_string(),
            endpoint: Some("http://localhost:9000".to_string()),
            region: Some("us-east-1".to_string()),
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: Some("secret-key".to_string()),
            force_path_style: true,
            public_base_url: Some("https://cdn.example.org".to_string()),
        };

        let json = serde_json::to_string(&config).unwrap();
        let decoded: StorageConfig = serde_json::from_str(&json).unwrap();

        match decoded {
            StorageConfig::S3 {
                force_path_style,
                public_base_url,
                ..
            } => {
                assert!(force_path_style);
                assert_eq!(public_base_url.as_deref(), Some("https://cdn.example.org"));
            }
            _ => panic!("expected S3 config"),
        }
    }

    #[test]
    fn test_storage_config_s3_validate_partial_credentials() {
        let json = r#"{"type":"s3","bucket":"b","access_key_id":"only-half"}"#;
        let config: StorageConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filesystem_config_without_public_base() {
        let json = r#"{"type":"filesystem","path":"/srv/tyler"}"#;
        let config: StorageConfig = serde_json::from_str(json).unwrap();
        match config {
            StorageConfig::Filesystem {
                path,
                public_base_url,
            } => {
                assert_eq!(path, PathBuf::from("/srv/tyler"));
                assert!(public_base_url.is_none());
            }
            _ => panic!("expected filesystem config"),
        }
    }

    #[test]
    fn test_admin_config_debug_redacts_password() {
        let admin = AdminConfig::for_testing();
        let rendered = format!("{admin:?}");
        assert!(!rendered.contains("admin-password"));
        assert!(admin.validate().is_ok());
    }

    #[test]
    fn test_app_config_admin_is_optional() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert!(config.admin.is_none());
        assert!(config.validate().is_ok());
        assert!(AppConfig::for_testing().validate().is_ok());
    }
}
