//! Member administration endpoints.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tyler_core::profile::{looks_like_email, validate_degree};
use tyler_core::{DEFAULT_DEGREE, Profile, ProfileChanges, Role, UserId, policy};
use tyler_identity::CredentialUpdate;
use tyler_identity::secret::generate_password;
use tyler_metadata::models::ProfileRow;

use crate::auth::{SessionResolution, load_profile, require_admin, require_profile};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{NewMember, json_body, non_empty, provision_member};
use crate::metrics;
use crate::state::AppState;

fn parse_user_id(id: &str) -> ApiResult<UserId> {
    UserId::parse(id).map_err(|_| ApiError::NotFound(format!("user {id} not found")))
}

/// All member profiles, ordered by the store.
pub async fn all_profiles(state: &AppState) -> ApiResult<Vec<Profile>> {
    let rows = state.metadata.list_profiles().await?;
    let mut profiles = Vec::with_capacity(rows.len());
    for row in rows {
        profiles.push(row.into_profile()?);
    }
    Ok(profiles)
}

/// GET /api/users
pub async fn list_users(
    State(state): State<AppState>,
    resolution: SessionResolution,
) -> ApiResult<Json<serde_json::Value>> {
    require_profile(&state, &resolution).await?;
    let users = all_profiles(&state).await?;
    Ok(Json(serde_json::json!({ "users": users })))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub degree: Option<i64>,
    #[serde(default)]
    pub lodge: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserResponse {
    pub user: Profile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_password: Option<String>,
}

/// POST /api/users - Admin creates a confirmed member.
///
/// Without a password an alphanumeric temporary one is generated and returned
/// once.
pub async fn create_user(
    State(state): State<AppState>,
    resolution: SessionResolution,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let admin = require_admin(&state, &resolution).await?;
    let request = json_body(payload)?;

    let mut invalid = Vec::new();
    let name = non_empty(request.name.as_deref());
    let email = non_empty(request.email.as_deref()).filter(|e| looks_like_email(e));
    let degree = match request.degree {
        Some(d) => validate_degree(d).ok(),
        None => Some(DEFAULT_DEGREE),
    };
    let role = match non_empty(request.role.as_deref()) {
        Some(raw) => Role::parse(&raw).ok(),
        None => Some(Role::User),
    };
    if name.is_none() {
        invalid.push("name".to_string());
    }
    if email.is_none() {
        invalid.push("email".to_string());
    }
    if degree.is_none() {
        invalid.push("degree".to_string());
    }
    if role.is_none() {
        invalid.push("role".to_string());
    }
    let (Some(name), Some(email), Some(degree), Some(role)) = (name, email, degree, role) else {
        return Err(ApiError::Validation(invalid));
    };

    let (password, temporary_password) = match request.password.filter(|p| !p.is_empty()) {
        Some(password) => (password, None),
        None => {
            let generated = generate_password(state.config.auth.temporary_password_length);
            (generated.clone(), Some(generated))
        }
    };

    let user = provision_member(
        &state,
        NewMember {
            name,
            email,
            password,
            degree,
            lodge: non_empty(request.lodge.as_deref()),
            role,
            confirmed: true,
        },
    )
    .await?;
    tracing::info!(user_id = %user.id, admin = %admin.id, "member created by admin");

    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            user,
            temporary_password,
        }),
    )
        .into_response())
}

/// GET /api/users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    resolution: SessionResolution,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    resolution.require()?;
    let user_id = parse_user_id(&id)?;
    let user = load_profile(&state, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {id} not found")))?;
    Ok(Json(serde_json::json!({ "user": user })))
}

/// Partial member update. Profile fields plus credential-only fields.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(flatten)]
    pub changes: ProfileChanges,
    #[serde(default)]
    pub password: Option<String>,
    /// Approve (`true`) or suspend (`false`) sign-in.
    #[serde(default)]
    pub confirmed: Option<bool>,
}

/// PUT /api/users/{id}
///
/// Admins may change every field. Members may change only their own name and
/// password. The profile is written before the credential and restored when
/// the credential update fails.
pub async fn update_user(
    State(state): State<AppState>,
    resolution: SessionResolution,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let actor = require_profile(&state, &resolution).await?;
    let target = parse_user_id(&id)?;
    let UpdateUserRequest {
        changes,
        password,
        confirmed,
    } = json_body(payload)?;

    if changes.is_empty() && password.is_none() && confirmed.is_none() {
        return Err(ApiError::BadRequest("no changes requested".to_string()));
    }
    changes.validate()?;

    if !changes.is_empty() && !policy::can_update_profile(&actor, target, &changes) {
        return Err(ApiError::Forbidden(
            "you may only change your own name and password".to_string(),
        ));
    }
    if password.is_some() && !policy::can_change_password(&actor, target) {
        return Err(ApiError::Forbidden(
            "you may only change your own password".to_string(),
        ));
    }
    if confirmed.is_some() && !policy::can_manage_users(&actor) {
        return Err(ApiError::Forbidden(
            "administrator role required".to_string(),
        ));
    }

    let mut profile = load_profile(&state, target)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {id} not found")))?;
    let previous = profile.clone();

    // Profile first: it is the one write that can be put back exactly.
    if !changes.is_empty() {
        changes.apply(&mut profile);
        profile.updated_at = OffsetDateTime::now_utc();
        state
            .metadata
            .update_profile(&ProfileRow::from(&profile))
            .await?;
    }

    let credential_update = CredentialUpdate {
        email: changes.email.clone(),
        password: password.clone(),
        confirmed,
    };
    if !credential_update.is_empty()
        && let Err(primary) = state
            .identity
            .update_credential(target, &credential_update)
            .await
    {
        if changes.is_empty() {
            return Err(primary.into());
        }
        return match state.metadata.update_profile(&ProfileRow::from(&previous)).await {
            Ok(()) => {
                metrics::record_rollback("succeeded");
                Err(primary.into())
            }
            Err(e) => {
                metrics::record_rollback("failed");
                tracing::error!(user_id = %target, error = %e, "profile rollback failed");
                Err(ApiError::Consistency {
                    primary: format!("credential update failed: {primary}"),
                    rollback: Some(e.to_string()),
                })
            }
        };
    }
    // An admin reset ends the member's existing sessions.
    if password.is_some() && actor.id != target {
        let revoked = state.identity.revoke_sessions(target).await?;
        tracing::info!(user_id = %target, revoked, "sessions revoked after password reset");
    }

    tracing::info!(user_id = %target, actor = %actor.id, "member updated");
    Ok(Json(serde_json::json!({ "user": profile })))
}

/// DELETE /api/users/{id}
///
/// Deletes the credential first (ending its sessions), then the profile, then
/// detaches the member's rituals. Retrying after a partial failure finishes
/// the job.
pub async fn delete_user(
    State(state): State<AppState>,
    resolution: SessionResolution,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let admin = require_admin(&state, &resolution).await?;
    let target = parse_user_id(&id)?;
    if target == admin.id {
        return Err(ApiError::BadRequest(
            "administrators cannot delete their own account".to_string(),
        ));
    }

    let profile = load_profile(&state, target).await?;
    let credential = state.identity.get_credential(target).await?;
    if profile.is_none() && credential.is_none() {
        return Err(ApiError::NotFound(format!("user {id} not found")));
    }

    if credential.is_some() {
        state.identity.delete_credential(target).await?;
    }
    if profile.is_some()
        && let Err(e) = state.metadata.delete_profile(*target.as_uuid()).await
    {
        return Err(ApiError::Consistency {
            primary: format!("credential deleted but profile deletion failed: {e}"),
            rollback: None,
        });
    }

    match state.metadata.clear_ritual_owner(*target.as_uuid()).await {
        Ok(detached) => tracing::debug!(user_id = %target, detached, "rituals detached"),
        Err(e) => tracing::warn!(user_id = %target, error = %e, "failed to detach rituals"),
    }

    tracing::info!(user_id = %target, admin = %admin.id, "member deleted");
    Ok(Json(serde_json::json!({ "success": true })))
}
