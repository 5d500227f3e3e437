//! Cookie-carrying HTTP client for the Tyler API.

use std::sync::{Arc, RwLock};

use reqwest::header::{COOKIE, HeaderMap, SET_COOKIE};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::{Duration, OffsetDateTime};
use tyler_core::{Profile, Ritual, Session, VerifiedSession};

/// Cookie names used by the server.
pub const ACCESS_COOKIE: &str = "tyler-access-token";
pub const REFRESH_COOKIE: &str = "tyler-refresh-token";

/// Error returned by the API client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        status: StatusCode,
        code: Option<String>,
        message: String,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(String),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The server rejected the presented session or credentials.
    pub fn is_unauthenticated(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Session tokens held by the client and persisted by the CLI.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry of the access token.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl SessionTokens {
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }

    fn cookie_header(&self) -> String {
        format!(
            "{ACCESS_COOKIE}={}; {REFRESH_COOKIE}={}",
            self.access_token, self.refresh_token
        )
    }
}

impl From<&Session> for SessionTokens {
    fn from(session: &Session) -> Self {
        Self {
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            expires_at: session.expires_at,
        }
    }
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<RwLock<Option<SessionTokens>>>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> ClientResult<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(base_url).map_err(|e| ClientError::Url(e.to_string()))?,
            tokens: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// A client sharing the connection pool but holding its own tokens.
    pub fn scoped(&self, tokens: Option<SessionTokens>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            tokens: Arc::new(RwLock::new(tokens)),
        }
    }

    /// Currently installed session tokens.
    pub fn tokens(&self) -> Option<SessionTokens> {
        match self.tokens.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Install (or clear) the session tokens sent with every request.
    pub fn install(&self, tokens: Option<SessionTokens>) {
        match self.tokens.write() {
            Ok(mut guard) => *guard = tokens,
            Err(poisoned) => *poisoned.into_inner() = tokens,
        }
    }

    fn url(&self, path: &str) -> ClientResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Url(e.to_string()))
    }

    /// Pick up tokens the server rotated while handling a request.
    fn absorb_cookies(&self, headers: &HeaderMap) {
        let mut access = None;
        let mut refresh = None;
        let mut max_age = None;
        for value in headers.get_all(SET_COOKIE) {
            let Ok(value) = value.to_str() else { continue };
            let mut parts = value.split(';').map(str::trim);
            let Some((name, token)) = parts.next().and_then(|p| p.split_once('=')) else {
                continue;
            };
            if token.is_empty() {
                continue;
            }
            match name {
                ACCESS_COOKIE => {
                    access = Some(token.to_string());
                    max_age = parts
                        .filter_map(|attr| attr.split_once('='))
                        .find(|(key, _)| key.eq_ignore_ascii_case("max-age"))
                        .and_then(|(_, secs)| secs.parse::<i64>().ok());
                }
                REFRESH_COOKIE => refresh = Some(token.to_string()),
                _ => {}
            }
        }

        if let (Some(access_token), Some(refresh_token)) = (access, refresh) {
            let expires_at = OffsetDateTime::now_utc() + Duration::seconds(max_age.unwrap_or(0));
            tracing::debug!("server rotated session tokens");
            self.install(Some(SessionTokens {
                access_token,
                refresh_token,
                expires_at,
            }));
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> ClientResult<String> {
        let req = match self.tokens() {
            Some(tokens) => req.header(COOKIE, tokens.cookie_header()),
            None => req,
        };
        let response = req.send().await?;
        self.absorb_cookies(response.headers());
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> ClientResult<T> {
        let body = self.send(req).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn send_empty(&self, req: reqwest::RequestBuilder) -> ClientResult<()> {
        self.send(req).await.map(|_| ())
    }

    pub async fn health(&self) -> ClientResult<HealthResponse> {
        let url = self.url("/api/health")?;
        self.send_json(self.http.get(url)).await
    }

    /// Exchange credentials for a session. Does not install it.
    pub async fn login(&self, email: &str, password: &str) -> ClientResult<LoginResponse> {
        let url = self.url("/api/auth/login")?;
        let body = serde_json::json!({ "email": email, "password": password });
        // The response also sets cookies; keep them out of this client.
        self.scoped(None)
            .send_json(self.http.post(url).json(&body))
            .await
    }

    pub async fn logout(&self) -> ClientResult<()> {
        let url = self.url("/api/auth/logout")?;
        self.send_empty(self.http.post(url)).await
    }

    pub async fn register(&self, req: &RegisterRequest) -> ClientResult<RegisterResponse> {
        let url = self.url("/api/auth/register")?;
        self.send_json(self.http.post(url).json(req)).await
    }

    /// Redeem the installed refresh token and install the new pair.
    pub async fn refresh(&self) -> ClientResult<Session> {
        let url = self.url("/api/auth/refresh")?;
        let response: RefreshResponse = self.send_json(self.http.post(url)).await?;
        self.install(Some(SessionTokens::from(&response.session)));
        Ok(response.session)
    }

    pub async fn me(&self) -> ClientResult<MeResponse> {
        let url = self.url("/api/auth/me")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn list_rituals(&self, query: &RitualQuery) -> ClientResult<ListRitualsResponse> {
        let url = self.url("/api/rituals")?;
        self.send_json(self.http.get(url).query(query)).await
    }

    pub async fn ritual_stats(&self) -> ClientResult<RitualStats> {
        let url = self.url("/api/rituals/stats")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn get_ritual(&self, id: &str) -> ClientResult<Ritual> {
        let url = self.url(&format!("/api/rituals/{id}"))?;
        let response: RitualResponse = self.send_json(self.http.get(url)).await?;
        Ok(response.ritual)
    }

    pub async fn delete_ritual(&self, id: &str) -> ClientResult<()> {
        let url = self.url(&format!("/api/rituals/{id}"))?;
        self.send_empty(self.http.delete(url)).await
    }

    pub async fn list_users(&self) -> ClientResult<Vec<Profile>> {
        let url = self.url("/api/users")?;
        let response: ListUsersResponse = self.send_json(self.http.get(url)).await?;
        Ok(response.users)
    }

    pub async fn create_user(&self, req: &CreateUserRequest) -> ClientResult<CreateUserResponse> {
        let url = self.url("/api/users")?;
        self.send_json(self.http.post(url).json(req)).await
    }

    pub async fn update_user(&self, id: &str, req: &UpdateUserRequest) -> ClientResult<Profile> {
        let url = self.url(&format!("/api/users/{id}"))?;
        let response: UserResponse = self.send_json(self.http.put(url).json(req)).await?;
        Ok(response.user)
    }

    pub async fn delete_user(&self, id: &str) -> ClientResult<()> {
        let url = self.url(&format!("/api/users/{id}"))?;
        self.send_empty(self.http.delete(url)).await
    }
}

fn api_error(status: StatusCode, body: &str) -> ClientError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
        code: Option<String>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => ClientError::Api {
            status,
            code: parsed.code,
            message: parsed.error,
        },
        Err(_) => ClientError::Api {
            status,
            code: None,
            message: body.to_string(),
        },
    }
}

// =============================================================================
// Request/response types (mirrored from server handlers)
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub user: Profile,
    pub session: Session,
}

#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub session: Session,
}

#[derive(Debug, Deserialize)]
pub struct MeResponse {
    pub user: Profile,
    pub session: VerifiedSession,
}

#[derive(Debug, Default, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degree: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lodge: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user: Profile,
    pub pending_approval: bool,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RitualQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degree: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organize_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListRitualsResponse {
    pub rituals: Vec<Ritual>,
    #[serde(default)]
    pub groups: Option<std::collections::BTreeMap<String, Vec<Ritual>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RitualStats {
    pub total: usize,
    pub by_degree: std::collections::BTreeMap<String, usize>,
}

#[derive(Debug, Deserialize)]
struct RitualResponse {
    ritual: Ritual,
}

#[derive(Debug, Deserialize)]
struct ListUsersResponse {
    users: Vec<Profile>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: Profile,
}

#[derive(Debug, Default, Serialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degree: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lodge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserResponse {
    pub user: Profile,
    #[serde(default)]
    pub temporary_password: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degree: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lodge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<bool>,
}
