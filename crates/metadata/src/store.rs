//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult, map_unique_violation};
use crate::repos::{CredentialRepo, ProfileRepo, RitualRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: CredentialRepo + ProfileRepo + RitualRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
}

impl SqliteStore {
    /// Create a new SQLite store and apply the schema.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout = Duration::from_secs(query_timeout_secs.unwrap_or(30));

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // One writer connection: SQLite serializes writes anyway.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout,
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// SQLite cannot cancel statements; slow ones are reported instead.
    fn note_duration(&self, operation: &'static str, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed > self.query_timeout {
            tracing::warn!(
                operation,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = self.query_timeout.as_millis() as u64,
                "metadata query exceeded advisory timeout"
            );
        }
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;
    use tyler_core::RitualFilter;
    use uuid::Uuid;

    #[async_trait]
    impl CredentialRepo for SqliteStore {
        async fn create_credential(&self, credential: &CredentialRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO credentials (
                    credential_id, email, password_hash, confirmed, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(credential.credential_id)
            .bind(&credential.email)
            .bind(&credential.password_hash)
            .bind(credential.confirmed)
            .bind(credential.created_at)
            .bind(credential.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "credential"))?;
            Ok(())
        }

        async fn get_credential(
            &self,
            credential_id: Uuid,
        ) -> MetadataResult<Option<CredentialRow>> {
            let row = sqlx::query_as::<_, CredentialRow>(
                "SELECT * FROM credentials WHERE credential_id = ?",
            )
            .bind(credential_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_credential_by_email(
            &self,
            email: &str,
        ) -> MetadataResult<Option<CredentialRow>> {
            let row =
                sqlx::query_as::<_, CredentialRow>("SELECT * FROM credentials WHERE email = ?")
                    .bind(email)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn update_credential(&self, credential: &CredentialRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE credentials
                SET email = ?, password_hash = ?, confirmed = ?, updated_at = ?
                WHERE credential_id = ?
                "#,
            )
            .bind(&credential.email)
            .bind(&credential.password_hash)
            .bind(credential.confirmed)
            .bind(credential.updated_at)
            .bind(credential.credential_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "credential"))?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "credential {} not found",
                    credential.credential_id
                )));
            }
            Ok(())
        }

        async fn delete_credential(&self, credential_id: Uuid) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM credentials WHERE credential_id = ?")
                .bind(credential_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "credential {credential_id} not found"
                )));
            }
            Ok(())
        }

        async fn create_session(&self, session: &SessionRow) -> MetadataResult<()> {
            insert_session(&self.pool, session).await
        }

        async fn get_session_by_id(&self, session_id: Uuid) -> MetadataResult<Option<SessionRow>> {
            let row =
                sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE session_id = ?")
                    .bind(session_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn get_session_by_access_hash(
            &self,
            hash: &str,
        ) -> MetadataResult<Option<SessionRow>> {
            let row = sqlx::query_as::<_, SessionRow>(
                "SELECT * FROM sessions WHERE access_token_hash = ?",
            )
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_session_by_refresh_hash(
            &self,
            hash: &str,
        ) -> MetadataResult<Option<SessionRow>> {
            let row = sqlx::query_as::<_, SessionRow>(
                "SELECT * FROM sessions WHERE refresh_token_hash = ?",
            )
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn revoke_session(
            &self,
            session_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE sessions SET revoked_at = ? WHERE session_id = ? AND revoked_at IS NULL",
            )
            .bind(revoked_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn rotate_session(
            &self,
            old_session_id: Uuid,
            revoked_at: OffsetDateTime,
            replacement: &SessionRow,
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;

            let revoked = sqlx::query(
                "UPDATE sessions SET revoked_at = ?, replaced_by = ? \
                 WHERE session_id = ? AND revoked_at IS NULL",
            )
            .bind(revoked_at)
            .bind(replacement.session_id)
            .bind(old_session_id)
            .execute(&mut *tx)
            .await?;

            if revoked.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(MetadataError::Constraint(format!(
                    "session {old_session_id} already revoked"
                )));
            }

            sqlx::query(INSERT_SESSION_SQL)
                .bind(replacement.session_id)
                .bind(replacement.credential_id)
                .bind(&replacement.access_token_hash)
                .bind(&replacement.refresh_token_hash)
                .bind(replacement.access_expires_at)
                .bind(replacement.refresh_expires_at)
                .bind(replacement.created_at)
                .bind(replacement.revoked_at)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(())
        }

        async fn revoke_sessions_for_credential(
            &self,
            credential_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                "UPDATE sessions SET revoked_at = ? WHERE credential_id = ? AND revoked_at IS NULL",
            )
            .bind(revoked_at)
            .bind(credential_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }

        async fn purge_sessions(&self, now: OffsetDateTime) -> MetadataResult<u64> {
            let started = Instant::now();
            let result = sqlx::query(
                "DELETE FROM sessions WHERE revoked_at IS NOT NULL OR refresh_expires_at <= ?",
            )
            .bind(now)
            .execute(&self.pool)
            .await?;
            self.note_duration("purge_sessions", started);
            Ok(result.rows_affected())
        }
    }

    const INSERT_SESSION_SQL: &str = r#"
        INSERT INTO sessions (
            session_id, credential_id, access_token_hash, refresh_token_hash,
            access_expires_at, refresh_expires_at, created_at, revoked_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    "#;

    async fn insert_session(pool: &Pool<Sqlite>, session: &SessionRow) -> MetadataResult<()> {
        sqlx::query(INSERT_SESSION_SQL)
            .bind(session.session_id)
            .bind(session.credential_id)
            .bind(&session.access_token_hash)
            .bind(&session.refresh_token_hash)
            .bind(session.access_expires_at)
            .bind(session.refresh_expires_at)
            .bind(session.created_at)
            .bind(session.revoked_at)
            .execute(pool)
            .await?;
        Ok(())
    }

    #[async_trait]
    impl ProfileRepo for SqliteStore {
        async fn create_profile(&self, profile: &ProfileRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO profiles (
                    profile_id, name, email, degree, lodge, role, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(profile.profile_id)
            .bind(&profile.name)
            .bind(&profile.email)
            .bind(profile.degree)
            .bind(&profile.lodge)
            .bind(&profile.role)
            .bind(profile.created_at)
            .bind(profile.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "profile"))?;
            Ok(())
        }

        async fn get_profile(&self, profile_id: Uuid) -> MetadataResult<Option<ProfileRow>> {
            let row =
                sqlx::query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE profile_id = ?")
                    .bind(profile_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn get_profile_by_email(&self, email: &str) -> MetadataResult<Option<ProfileRow>> {
            let row = sqlx::query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_profiles(&self) -> MetadataResult<Vec<ProfileRow>> {
            let started = Instant::now();
            let rows = sqlx::query_as::<_, ProfileRow>(
                "SELECT * FROM profiles ORDER BY created_at DESC",
            )
            .fetch_all(&self.pool)
            .await?;
            self.note_duration("list_profiles", started);
            Ok(rows)
        }

        async fn update_profile(&self, profile: &ProfileRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE profiles
                SET name = ?, email = ?, degree = ?, lodge = ?, role = ?, updated_at = ?
                WHERE profile_id = ?
                "#,
            )
            .bind(&profile.name)
            .bind(&profile.email)
            .bind(profile.degree)
            .bind(&profile.lodge)
            .bind(&profile.role)
            .bind(profile.updated_at)
            .bind(profile.profile_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "profile"))?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "profile {} not found",
                    profile.profile_id
                )));
            }
            Ok(())
        }

        async fn delete_profile(&self, profile_id: Uuid) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM profiles WHERE profile_id = ?")
                .bind(profile_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "profile {profile_id} not found"
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RitualRepo for SqliteStore {
        async fn create_ritual(&self, ritual: &RitualRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO rituals (
                    ritual_id, name, degree, ritual_system, language, author, file_url,
                    file_key, content_type, size_bytes, owner_id, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(ritual.ritual_id)
            .bind(&ritual.name)
            .bind(ritual.degree)
            .bind(&ritual.ritual_system)
            .bind(&ritual.language)
            .bind(&ritual.author)
            .bind(&ritual.file_url)
            .bind(&ritual.file_key)
            .bind(&ritual.content_type)
            .bind(ritual.size_bytes)
            .bind(ritual.owner_id)
            .bind(ritual.created_at)
            .bind(ritual.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "ritual"))?;
            Ok(())
        }

        async fn get_ritual(&self, ritual_id: Uuid) -> MetadataResult<Option<RitualRow>> {
            let row = sqlx::query_as::<_, RitualRow>("SELECT * FROM rituals WHERE ritual_id = ?")
                .bind(ritual_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_rituals(&self, filter: &RitualFilter) -> MetadataResult<Vec<RitualRow>> {
            let started = Instant::now();
            let rows = sqlx::query_as::<_, RitualRow>(
                r#"
                SELECT * FROM rituals
                WHERE (? IS NULL OR degree = ?)
                  AND (? IS NULL OR ritual_system = ?)
                  AND (? IS NULL OR language = ?)
                ORDER BY created_at DESC
                "#,
            )
            .bind(filter.degree)
            .bind(filter.degree)
            .bind(&filter.system)
            .bind(&filter.system)
            .bind(&filter.language)
            .bind(&filter.language)
            .fetch_all(&self.pool)
            .await?;
            self.note_duration("list_rituals", started);
            Ok(rows)
        }

        async fn delete_ritual(&self, ritual_id: Uuid) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM rituals WHERE ritual_id = ?")
                .bind(ritual_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "ritual {ritual_id} not found"
                )));
            }
            Ok(())
        }

        async fn clear_ritual_owner(&self, owner_id: Uuid) -> MetadataResult<u64> {
            let result = sqlx::query("UPDATE rituals SET owner_id = NULL WHERE owner_id = ?")
                .bind(owner_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Credentials: email/password identities
CREATE TABLE IF NOT EXISTS credentials (
    credential_id BLOB PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    confirmed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Sessions: hashed access/refresh pairs
CREATE TABLE IF NOT EXISTS sessions (
    session_id BLOB PRIMARY KEY,
    credential_id BLOB NOT NULL REFERENCES credentials(credential_id) ON DELETE CASCADE,
    access_token_hash TEXT NOT NULL UNIQUE,
    refresh_token_hash TEXT NOT NULL UNIQUE,
    access_expires_at TEXT NOT NULL,
    refresh_expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    revoked_at TEXT,
    replaced_by BLOB
);
CREATE INDEX IF NOT EXISTS idx_sessions_credential ON sessions(credential_id);
CREATE INDEX IF NOT EXISTS idx_sessions_refresh_expiry ON sessions(refresh_expires_at);

-- Profiles: keyed by credential identity, held apart from credentials
CREATE TABLE IF NOT EXISTS profiles (
    profile_id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    degree INTEGER CHECK (degree IS NULL OR degree >= 1),
    lodge TEXT,
    role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('admin', 'user')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_profiles_created ON profiles(created_at);

-- Rituals: document metadata; binaries live in the object store
CREATE TABLE IF NOT EXISTS rituals (
    ritual_id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    degree INTEGER,
    ritual_system TEXT NOT NULL,
    language TEXT NOT NULL,
    author TEXT NOT NULL DEFAULT '',
    file_url TEXT NOT NULL,
    file_key TEXT,
    content_type TEXT,
    size_bytes INTEGER,
    owner_id BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rituals_degree ON rituals(degree);
CREATE INDEX IF NOT EXISTS idx_rituals_created ON rituals(created_at);
CREATE INDEX IF NOT EXISTS idx_rituals_owner ON rituals(owner_id);
"#;
