//! Health check and break-glass session diagnostics.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Serialize;
use time::OffsetDateTime;
use tyler_core::{Role, UserId};

use crate::auth::{SessionResolution, load_profile};
use crate::cookies::SessionCookies;
use crate::error::ApiResult;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /api/health - Health check.
///
/// Unauthenticated for load balancers and probes. Fails when the metadata
/// store is unreachable.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Serialize)]
pub struct CookiePresence {
    pub access: bool,
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<UserId>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    pub degree: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct StoreHealth {
    pub metadata: String,
    pub storage: String,
}

/// Everything the diagnostic endpoints report. Never includes token values.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDiagnostics {
    pub cookies: CookiePresence,
    pub session: SessionSummary,
    pub profile: Option<ProfileSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_error: Option<String>,
    pub stores: StoreHealth,
}

fn status_text<E: std::fmt::Display>(result: Result<(), E>, detail: bool) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(e) if detail => format!("error: {e}"),
        Err(_) => "error".to_string(),
    }
}

impl SessionDiagnostics {
    /// Gather diagnostics for the current request. Each probe fails on its
    /// own; none aborts the report.
    pub async fn collect(state: &AppState, headers: &HeaderMap, resolution: &SessionResolution) -> Self {
        let detail = state.config.server.expose_error_detail;
        let presented = SessionCookies::from_headers(headers);

        let session = SessionSummary {
            state: resolution.label(),
            subject_id: resolution.subject(),
            expires_at: resolution.verified().map(|v| v.expires_at),
            error: match resolution {
                SessionResolution::Failed(e) if detail => Some(e.clone()),
                SessionResolution::Failed(_) => Some("session lookup failed".to_string()),
                _ => None,
            },
        };

        let (profile, profile_error) = match resolution.subject() {
            Some(subject) => match load_profile(state, subject).await {
                Ok(Some(p)) => (
                    Some(ProfileSummary {
                        id: p.id,
                        name: p.name,
                        role: p.role,
                        degree: p.degree,
                    }),
                    None,
                ),
                Ok(None) => (None, Some("no profile for this account".to_string())),
                Err(e) => {
                    tracing::warn!(error = %e, "profile lookup failed during diagnostics");
                    (None, Some(e.public_message()))
                }
            },
            None => (None, None),
        };

        let stores = StoreHealth {
            metadata: status_text(state.metadata.health_check().await, detail),
            storage: status_text(state.storage.health_check().await, detail),
        };

        Self {
            cookies: CookiePresence {
                access: presented.access.is_some(),
                refresh: presented.refresh.is_some(),
            },
            session,
            profile,
            profile_error,
            stores,
        }
    }
}

/// GET /api/debug/session - Break-glass session diagnostics.
pub async fn debug_session(
    State(state): State<AppState>,
    resolution: SessionResolution,
    headers: HeaderMap,
) -> Json<SessionDiagnostics> {
    Json(SessionDiagnostics::collect(&state, &headers, &resolution).await)
}
