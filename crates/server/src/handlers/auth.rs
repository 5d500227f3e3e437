//! Authentication endpoints: sign-in, sign-out, registration, refresh and
//! the caller's identity.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tyler_core::profile::validate_degree;
use tyler_core::{DEFAULT_DEGREE, Profile, Role, Session, VerifiedSession};
use tyler_identity::{IdentityError, Refresh};

use crate::auth::{SessionResolution, load_profile, require_profile};
use crate::cookies::{self, REFRESH_COOKIE, SessionCookies};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{NewMember, json_body, non_empty, provision_member};
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: Profile,
    pub session: Session,
}

/// Sign a member in and load their profile.
///
/// A credential without a profile cannot sign in; its fresh session is revoked.
pub async fn sign_in_member(state: &AppState, email: &str, password: &str) -> ApiResult<(Profile, Session)> {
    let session = match state.identity.sign_in(email, password).await {
        Ok(session) => session,
        Err(e) => {
            let outcome = match e {
                IdentityError::InvalidCredentials => "rejected",
                IdentityError::PendingApproval => "pending",
                _ => "error",
            };
            metrics::record_sign_in(outcome);
            tracing::info!(outcome, "sign-in failed");
            return Err(e.into());
        }
    };

    match load_profile(state, session.subject_id).await? {
        Some(profile) => {
            metrics::record_sign_in("success");
            tracing::info!(user_id = %profile.id, "signed in");
            Ok((profile, session))
        }
        None => {
            metrics::record_sign_in("error");
            tracing::error!(user_id = %session.subject_id, "credential has no profile, refusing sign-in");
            state.identity.sign_out(&session.access_token).await?;
            Err(ApiError::Forbidden(
                "no profile exists for this account".to_string(),
            ))
        }
    }
}

/// Revoke every session token the request carries. Failures are logged, not
/// returned: signing out always clears the client.
pub async fn revoke_presented(state: &AppState, headers: &HeaderMap, resolution: &SessionResolution) {
    let presented = SessionCookies::from_headers(headers);
    let issued = resolution.issued().map(|s| s.access_token.clone());
    for token in [presented.access, presented.refresh, issued].into_iter().flatten() {
        if let Err(e) = state.identity.sign_out(&token).await {
            tracing::warn!(error = %e, "failed to revoke session token");
        }
    }
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let request = json_body(payload)?;
    let email = non_empty(request.email.as_deref());
    let password = request.password.filter(|p| !p.is_empty());

    let mut missing = Vec::new();
    if email.is_none() {
        missing.push("email".to_string());
    }
    if password.is_none() {
        missing.push("password".to_string());
    }
    let (Some(email), Some(password)) = (email, password) else {
        return Err(ApiError::Validation(missing));
    };

    let (user, session) = sign_in_member(&state, &email, &password).await?;

    let mut headers = HeaderMap::new();
    cookies::append_cookies(
        &mut headers,
        cookies::session_cookies(&session, &state.config.auth, state.secure_cookies())?,
    );
    Ok((StatusCode::OK, headers, Json(LoginResponse { user, session })).into_response())
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    resolution: SessionResolution,
    headers: HeaderMap,
) -> ApiResult<Response> {
    revoke_presented(&state, &headers, &resolution).await;
    if let Some(subject) = resolution.subject() {
        tracing::info!(user_id = %subject, "signed out");
    }

    let mut response_headers = HeaderMap::new();
    cookies::append_cookies(
        &mut response_headers,
        cookies::cleared_cookies(state.secure_cookies())?,
    );
    Ok((
        response_headers,
        Json(serde_json::json!({ "success": true })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
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
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user: Profile,
    pub pending_approval: bool,
}

/// Validate a self-registration and turn it into a new, unconfirmed member.
pub fn registration_member(request: RegisterRequest, min_password_length: usize) -> ApiResult<NewMember> {
    let mut invalid = Vec::new();
    let name = non_empty(request.name.as_deref());
    let email = non_empty(request.email.as_deref())
        .filter(|e| tyler_core::profile::looks_like_email(e));
    let password = request
        .password
        .filter(|p| p.chars().count() >= min_password_length);
    let degree = match request.degree {
        Some(d) => validate_degree(d).ok(),
        None => Some(DEFAULT_DEGREE),
    };

    if name.is_none() {
        invalid.push("name".to_string());
    }
    if email.is_none() {
        invalid.push("email".to_string());
    }
    if password.is_none() {
        invalid.push("password".to_string());
    }
    if degree.is_none() {
        invalid.push("degree".to_string());
    }
    match (name, email, password, degree) {
        (Some(name), Some(email), Some(password), Some(degree)) => Ok(NewMember {
            name,
            email,
            password,
            degree,
            lodge: non_empty(request.lodge.as_deref()),
            role: Role::User,
            confirmed: false,
        }),
        _ => Err(ApiError::Validation(invalid)),
    }
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let request = json_body(payload)?;
    let member = registration_member(request, state.identity.min_password_length())?;
    let user = provision_member(&state, member).await?;
    tracing::info!(user_id = %user.id, "registration pending approval");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user,
            pending_approval: true,
        }),
    )
        .into_response())
}

/// POST /api/auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    resolution: SessionResolution,
    headers: HeaderMap,
) -> ApiResult<Response> {
    // The gatekeeper already redeemed the refresh cookie for this request.
    let session = match resolution.issued() {
        Some(session) => session.clone(),
        None => {
            let token = cookies::read_cookie(&headers, REFRESH_COOKIE).ok_or_else(|| {
                ApiError::Unauthenticated("no refresh token presented".to_string())
            })?;
            match state.identity.refresh_session(&token).await? {
                Refresh::Issued(session) => session,
                // The caller's cookies are still good for the successor; only
                // the concurrent winner holds the new pair.
                Refresh::Superseded(_) => {
                    return Err(ApiError::Conflict(
                        "refresh token was already redeemed by a concurrent request".to_string(),
                    ));
                }
                Refresh::Rejected => {
                    return Err(ApiError::Unauthenticated(
                        "refresh token is invalid or expired".to_string(),
                    ));
                }
            }
        }
    };

    let mut response_headers = HeaderMap::new();
    cookies::append_cookies(
        &mut response_headers,
        cookies::session_cookies(&session, &state.config.auth, state.secure_cookies())?,
    );
    Ok((
        response_headers,
        Json(serde_json::json!({ "session": session })),
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: Profile,
    pub session: VerifiedSession,
}

/// GET /api/auth/me - The caller's profile and session.
pub async fn me(State(state): State<AppState>, resolution: SessionResolution) -> ApiResult<Json<MeResponse>> {
    let session = resolution.require()?.clone();
    let user = require_profile(&state, &resolution).await?;
    Ok(Json(MeResponse { user, session }))
}
