//! Session resolution, the access gatekeeper middleware and endpoint guards.

use std::convert::Infallible;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use tracing::Instrument;
use tyler_core::gate::{self, GateDecision, RouteClass, SessionLookup};
use tyler_core::{Profile, Session, UserId, VerifiedSession, policy};
use tyler_identity::{IdentityProvider, Refresh};
use uuid::Uuid;

use crate::cookies::{self, SessionCookies};
use crate::error::{ApiError, ApiResult, expose_error_detail};
use crate::state::AppState;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value, keeping at most
    /// `MAX_TRACE_ID_LEN` printable ASCII characters.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extract trace ID from the X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Outcome of resolving the caller's session from the request cookies.
///
/// Inserted into the request extensions by [`auth_middleware`]; handlers take
/// it as an extractor.
#[derive(Clone, Debug)]
pub enum SessionResolution {
    /// The access token cookie resolved.
    Active(VerifiedSession),
    /// The access token was missing or stale and the refresh token was
    /// redeemed. The new pair is written back as cookies on the response.
    Refreshed(VerifiedSession, Session),
    /// No usable session cookies.
    Missing,
    /// The credential store failed.
    Failed(String),
}

impl SessionResolution {
    pub fn verified(&self) -> Option<&VerifiedSession> {
        match self {
            Self::Active(verified) | Self::Refreshed(verified, _) => Some(verified),
            Self::Missing | Self::Failed(_) => None,
        }
    }

    /// Tokens issued while resolving, if a refresh happened.
    pub fn issued(&self) -> Option<&Session> {
        match self {
            Self::Refreshed(_, session) => Some(session),
            _ => None,
        }
    }

    pub fn subject(&self) -> Option<UserId> {
        self.verified().map(|v| v.subject_id)
    }

    pub fn lookup(&self) -> SessionLookup {
        match self {
            Self::Active(_) | Self::Refreshed(..) => SessionLookup::Found,
            Self::Missing => SessionLookup::Missing,
            Self::Failed(_) => SessionLookup::Failed,
        }
    }

    /// Short label for diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active(_) => "active",
            Self::Refreshed(..) => "refreshed",
            Self::Missing => "missing",
            Self::Failed(_) => "failed",
        }
    }

    /// Require a session, rejecting with 401 when there is none.
    pub fn require(&self) -> ApiResult<&VerifiedSession> {
        match self {
            Self::Active(verified) | Self::Refreshed(verified, _) => Ok(verified),
            Self::Missing => Err(ApiError::Unauthenticated(
                "a valid session is required".to_string(),
            )),
            Self::Failed(e) => Err(ApiError::Internal(format!("session lookup failed: {e}"))),
        }
    }
}

impl<S> FromRequestParts<S> for SessionResolution
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<SessionResolution>()
            .cloned()
            .unwrap_or(SessionResolution::Missing))
    }
}

/// Resolve a session from cookies: access token first, then the refresh token.
pub async fn resolve_session(
    identity: &dyn IdentityProvider,
    cookies: &SessionCookies,
) -> SessionResolution {
    if let Some(access) = &cookies.access {
        match identity.get_session(access).await {
            Ok(Some(verified)) => return SessionResolution::Active(verified),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "access token lookup failed");
                return SessionResolution::Failed(e.to_string());
            }
        }
    }

    let Some(refresh) = &cookies.refresh else {
        return SessionResolution::Missing;
    };

    let session = match identity.refresh_session(refresh).await {
        Ok(Refresh::Issued(session)) => session,
        // A concurrent request already rotated these cookies and is sending
        // the new pair back. Ride on its session and leave cookies alone.
        Ok(Refresh::Superseded(successor)) => {
            tracing::debug!(subject = %successor.subject_id, "refresh cookie already rotated");
            return SessionResolution::Active(successor);
        }
        Ok(Refresh::Rejected) => return SessionResolution::Missing,
        Err(e) => {
            tracing::warn!(error = %e, "session refresh failed");
            return SessionResolution::Failed(e.to_string());
        }
    };

    match identity.get_session(&session.access_token).await {
        Ok(Some(verified)) => {
            tracing::debug!(subject = %verified.subject_id, "session refreshed from cookie");
            SessionResolution::Refreshed(verified, session)
        }
        Ok(None) => SessionResolution::Missing,
        Err(e) => SessionResolution::Failed(e.to_string()),
    }
}

/// Paths that never need the caller's session.
fn skips_session(path: &str) -> bool {
    path.starts_with(tyler_storage::FILES_ROUTE_PREFIX) || path == "/metrics" || path == "/favicon.ico"
}

/// Gatekeeper middleware: sets up the trace span, resolves the session,
/// redirects unauthenticated page requests to sign-in and writes refreshed
/// tokens back as cookies.
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(&req);
    let span = tracing::info_span!("request", trace_id = %trace_id);
    req.extensions_mut().insert(trace_id);

    async move {
        let path = req.uri().path().to_string();
        let class = gate::classify(&path);

        let cookies = SessionCookies::from_headers(req.headers());
        let resolution = if skips_session(&path) {
            SessionResolution::Missing
        } else {
            resolve_session(state.identity.as_ref(), &cookies).await
        };

        if gate::decide(class, resolution.lookup()) == GateDecision::RedirectToSignIn {
            crate::metrics::GATE_REDIRECTS.inc();
            tracing::info!(path = %path, session = resolution.label(), "redirecting to sign-in");
            let mut response = Redirect::to(gate::SIGN_IN_PATH).into_response();
            if !cookies.is_empty() && matches!(resolution, SessionResolution::Missing) {
                match cookies::cleared_cookies(state.secure_cookies()) {
                    Ok(cleared) => cookies::append_cookies(response.headers_mut(), cleared),
                    Err(e) => tracing::warn!(error = %e, "failed to build cleared cookies"),
                }
            }
            return response;
        }

        let issued = resolution.issued().cloned();
        if class != RouteClass::Excluded {
            tracing::debug!(path = %path, session = resolution.label(), "gate passed");
        }
        req.extensions_mut().insert(resolution);

        let mut response = next.run(req).await;

        // Handlers that set cookies themselves (sign-in, sign-out) win.
        if let Some(session) = issued
            && !cookies::sets_session_cookie(response.headers())
        {
            match cookies::session_cookies(&session, &state.config.auth, state.secure_cookies()) {
                Ok(values) => cookies::append_cookies(response.headers_mut(), values),
                Err(e) => tracing::warn!(error = %e, "failed to write refreshed cookies"),
            }
        }

        if state.config.server.expose_error_detail {
            response = expose_error_detail(response);
        }
        response
    }
    .instrument(span)
    .await
}

/// Load the profile of a member, if one exists.
pub async fn load_profile(state: &AppState, id: UserId) -> ApiResult<Option<Profile>> {
    match state.metadata.get_profile(*id.as_uuid()).await? {
        Some(row) => Ok(Some(row.into_profile()?)),
        None => Ok(None),
    }
}

/// Profile of the caller, when signed in.
pub async fn optional_profile(
    state: &AppState,
    resolution: &SessionResolution,
) -> ApiResult<Option<Profile>> {
    match resolution {
        SessionResolution::Failed(e) => {
            Err(ApiError::Internal(format!("session lookup failed: {e}")))
        }
        _ => match resolution.subject() {
            Some(subject) => load_profile(state, subject).await,
            None => Ok(None),
        },
    }
}

/// Require a signed-in caller with a profile.
pub async fn require_profile(state: &AppState, resolution: &SessionResolution) -> ApiResult<Profile> {
    let verified = resolution.require()?;
    load_profile(state, verified.subject_id)
        .await?
        .ok_or_else(|| ApiError::Forbidden("no profile exists for this account".to_string()))
}

/// Require a signed-in administrator.
pub async fn require_admin(state: &AppState, resolution: &SessionResolution) -> ApiResult<Profile> {
    let profile = require_profile(state, resolution).await?;
    if !policy::can_manage_users(&profile) {
        return Err(ApiError::Forbidden(
            "administrator role required".to_string(),
        ));
    }
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_from_client_sanitizes() {
        let id = TraceId::from_client("abc\n\u{7}def");
        assert_eq!(id.as_str(), "abcdef");

        let long = "x".repeat(500);
        assert_eq!(TraceId::from_client(&long).as_str().len(), MAX_TRACE_ID_LEN);

        let generated = TraceId::from_client("\n\n");
        assert!(Uuid::parse_str(generated.as_str()).is_ok());
    }

    #[test]
    fn test_resolution_lookup_mapping() {
        assert_eq!(SessionResolution::Missing.lookup(), SessionLookup::Missing);
        assert_eq!(
            SessionResolution::Failed("down".into()).lookup(),
            SessionLookup::Failed
        );
        assert!(matches!(
            SessionResolution::Missing.require(),
            Err(ApiError::Unauthenticated(_))
        ));
        assert!(matches!(
            SessionResolution::Failed("down".into()).require(),
            Err(ApiError::Internal(_))
        ));
    }

    #[test]
    fn test_skips_session() {
        assert!(skips_session("/files/rituals/1/a.pdf"));
        assert!(skips_session("/metrics"));
        assert!(!skips_session("/api/auth/me"));
        assert!(!skips_session("/auth-debug"));
    }
}
