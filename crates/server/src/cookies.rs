//! Session cookie parsing and `Set-Cookie` construction.

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use tyler_core::Session;
use tyler_core::config::AuthConfig;

use crate::error::{ApiError, ApiResult};

/// Cookie holding the access token.
pub const ACCESS_COOKIE: &str = "tyler-access-token";

/// Cookie holding the refresh token.
pub const REFRESH_COOKIE: &str = "tyler-refresh-token";

/// Read a cookie value from the request headers. Empty values count as absent.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Session tokens presented by the client.
#[derive(Clone, Default)]
pub struct SessionCookies {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl SessionCookies {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            access: read_cookie(headers, ACCESS_COOKIE),
            refresh: read_cookie(headers, REFRESH_COOKIE),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

impl std::fmt::Debug for SessionCookies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCookies")
            .field("access", &self.access.as_ref().map(|_| "[REDACTED]"))
            .field("refresh", &self.refresh.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn build_cookie(name: &str, value: &str, max_age: i64, secure: bool) -> ApiResult<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}{secure}"
    ))
    .map_err(|e| ApiError::Internal(format!("invalid cookie value: {e}")))
}

/// `Set-Cookie` values installing a session.
pub fn session_cookies(
    session: &Session,
    auth: &AuthConfig,
    secure: bool,
) -> ApiResult<[HeaderValue; 2]> {
    Ok([
        build_cookie(
            ACCESS_COOKIE,
            &session.access_token,
            auth.access_token_ttl().whole_seconds(),
            secure,
        )?,
        build_cookie(
            REFRESH_COOKIE,
            &session.refresh_token,
            auth.refresh_token_ttl().whole_seconds(),
            secure,
        )?,
    ])
}

/// `Set-Cookie` values clearing both session cookies.
pub fn cleared_cookies(secure: bool) -> ApiResult<[HeaderValue; 2]> {
    Ok([
        build_cookie(ACCESS_COOKIE, "", 0, secure)?,
        build_cookie(REFRESH_COOKIE, "", 0, secure)?,
    ])
}

/// Append `Set-Cookie` headers.
pub fn append_cookies(headers: &mut HeaderMap, cookies: [HeaderValue; 2]) {
    for cookie in cookies {
        headers.append(SET_COOKIE, cookie);
    }
}

/// Whether a response already sets the session cookies.
pub fn sets_session_cookie(headers: &HeaderMap) -> bool {
    let prefix = format!("{ACCESS_COOKIE}=");
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with(&prefix))
}
