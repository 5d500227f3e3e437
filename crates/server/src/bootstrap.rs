//! Seed administrator initialization.

use anyhow::{Context, Result, bail};
use time::OffsetDateTime;
use tyler_core::config::AdminConfig;
use tyler_core::profile::normalize_email;
use tyler_core::{Profile, Role, UserId};
use tyler_identity::{CredentialUpdate, IdentityProvider, NewCredential};
use tyler_metadata::MetadataStore;
use tyler_metadata::models::ProfileRow;

/// Ensure the configured seed administrator can sign in.
///
/// Creates the credential when missing (which requires `admin.password`) or
/// confirms an existing one, then creates the admin profile or repairs one
/// whose role drifted or whose degree or lodge is unset. Running it again is
/// a no-op.
pub async fn ensure_seed_admin(
    identity: &dyn IdentityProvider,
    metadata: &dyn MetadataStore,
    config: Option<&AdminConfig>,
) -> Result<()> {
    let Some(config) = config else {
        tracing::debug!("No seed administrator configured");
        return Ok(());
    };
    let email = normalize_email(&config.email);

    let admin_id = match metadata.get_credential_by_email(&email).await? {
        Some(row) => {
            let id = UserId::from_uuid(row.credential_id);
            if !row.confirmed {
                identity
                    .update_credential(
                        id,
                        &CredentialUpdate {
                            confirmed: Some(true),
                            ..Default::default()
                        },
                    )
                    .await
                    .context("failed to confirm seed administrator credential")?;
                tracing::info!(user_id = %id, "Seed administrator credential confirmed");
            }
            id
        }
        None => {
            let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) else {
                bail!(
                    "seed administrator {email} has no credential; set admin.password \
                     (or TYLER_ADMIN__PASSWORD) to create it"
                );
            };
            let credential = identity
                .create_credential(NewCredential {
                    email: &email,
                    password,
                    confirmed: true,
                })
                .await
                .context("failed to create seed administrator credential")?;
            tracing::info!(user_id = %credential.id, "Seed administrator credential created");
            credential.id
        }
    };

    // A profile holding the admin email under another id blocks the real one.
    if let Some(stale) = metadata.get_profile_by_email(&email).await?
        && stale.profile_id != *admin_id.as_uuid()
    {
        if metadata.get_credential(stale.profile_id).await?.is_some() {
            bail!(
                "profile {} uses the seed administrator email but belongs to another account",
                stale.profile_id
            );
        }
        metadata
            .delete_profile(stale.profile_id)
            .await
            .context("failed to remove orphaned profile")?;
        tracing::warn!(profile_id = %stale.profile_id, "Removed orphaned profile holding the seed administrator email");
    }

    let now = OffsetDateTime::now_utc();
    match metadata.get_profile(*admin_id.as_uuid()).await? {
        Some(row) => {
            let mut profile = row.into_profile()?;
            let drifted = profile.role != Role::Admin
                || profile.degree.is_none()
                || profile.lodge.is_none()
                || profile.email != email;
            if !drifted {
                tracing::debug!("Seed administrator profile already in place");
                return Ok(());
            }
            profile.role = Role::Admin;
            profile.degree.get_or_insert(config.degree);
            profile.lodge.get_or_insert_with(|| config.lodge.clone());
            profile.email = email;
            profile.updated_at = now;
            metadata
                .update_profile(&ProfileRow::from(&profile))
                .await
                .context("failed to repair seed administrator profile")?;
            tracing::info!(user_id = %admin_id, "Seed administrator profile repaired");
        }
        None => {
            let profile = Profile {
                id: admin_id,
                name: config.name.clone(),
                email,
                degree: Some(config.degree),
                lodge: Some(config.lodge.clone()),
                role: Role::Admin,
                created_at: now,
                updated_at: now,
            };
            metadata
                .create_profile(&ProfileRow::from(&profile))
                .await
                .context("failed to create seed administrator profile")?;
            tracing::info!(user_id = %admin_id, "Seed administrator profile created");
        }
    }

    Ok(())
}
