//! Session cache: who is signed in, and with which profile.
//!
//! A [`SessionCache`] owns the session tokens installed in its [`ApiClient`]
//! and publishes an [`AuthState`] through a watch channel. Every operation
//! takes a request token from a monotonically increasing counter; when an
//! operation finishes after a newer one has started, its result is dropped.
//! Tokens are installed into the client only in the same step that commits
//! the state, so the published profile always belongs to the installed
//! session's subject. The one exception is a refresh rotation of the tokens
//! already installed: the subject does not change, and dropping the rotated
//! pair would strand the session on the server, since refresh tokens are
//! single-use.
//!
//! Refreshes are single-flight. A caller arriving while another refresh is in
//! flight waits for it and then resolves with whatever tokens it left behind.

use std::sync::Mutex;

use tokio::sync::{Mutex as AsyncMutex, watch};
use tyler_core::{Profile, VerifiedSession};

use crate::api_client::{ApiClient, ClientError, SessionTokens};

/// Authentication state of a client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    Uninitialized,
    Loading,
    Authenticated {
        session: VerifiedSession,
        profile: Profile,
    },
    Anonymous,
}

impl AuthState {
    pub fn profile(&self) -> Option<&Profile> {
        match self {
            AuthState::Authenticated { profile, .. } => Some(profile),
            _ => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, AuthState::Authenticated { .. } | AuthState::Anonymous)
    }
}

/// A resolved session ready to be committed.
struct Resolved {
    tokens: SessionTokens,
    session: VerifiedSession,
    profile: Profile,
}

pub struct SessionCache {
    client: ApiClient,
    state: watch::Sender<AuthState>,
    generation: Mutex<u64>,
    refresh_flight: AsyncMutex<()>,
}

impl SessionCache {
    /// Create a cache around a client. Tokens already installed in the
    /// client are picked up by [`SessionCache::initialize`].
    pub fn new(client: ApiClient) -> Self {
        let (state, _) = watch::channel(AuthState::Uninitialized);
        Self {
            client,
            state,
            generation: Mutex::new(0),
            refresh_flight: AsyncMutex::new(()),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Current state snapshot.
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Start an operation: bump the request token and show `Loading`.
    fn begin(&self) -> u64 {
        let mut generation = self.lock_generation();
        *generation += 1;
        self.state.send_replace(AuthState::Loading);
        *generation
    }

    /// Install `tokens` and publish `state` unless a newer operation began.
    fn commit(&self, request: u64, tokens: Option<SessionTokens>, state: AuthState) -> bool {
        let generation = self.lock_generation();
        if *generation != request {
            tracing::debug!(request, current = *generation, "discarding superseded session result");
            return false;
        }
        self.client.install(tokens);
        self.state.send_replace(state);
        true
    }

    fn lock_generation(&self) -> std::sync::MutexGuard<'_, u64> {
        match self.generation.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Install tokens rotated from `start` if `start` is still installed.
    fn adopt_rotation(&self, start: &SessionTokens, rotated: SessionTokens) -> bool {
        let _generation = self.lock_generation();
        if self.client.tokens().as_ref() != Some(start) {
            return false;
        }
        self.client.install(Some(rotated));
        true
    }

    fn commit_resolved(&self, request: u64, resolved: Option<Resolved>) -> bool {
        match resolved {
            Some(Resolved {
                tokens,
                session,
                profile,
            }) => self.commit(
                request,
                Some(tokens),
                AuthState::Authenticated { session, profile },
            ),
            None => self.commit(request, None, AuthState::Anonymous),
        }
    }

    /// Resolve the installed session once. Later calls are no-ops.
    pub async fn initialize(&self) -> AuthState {
        if self.state() != AuthState::Uninitialized {
            return self.state();
        }
        self.refresh_user_data().await;
        self.state()
    }

    /// Sign in and load the profile. Returns false on rejection, transport
    /// failure, or when a newer operation superseded this one.
    pub async fn sign_in(&self, email: &str, password: &str) -> bool {
        let request = self.begin();

        let login = match self.client.login(email, password).await {
            Ok(login) => login,
            Err(e) => {
                log_failure("sign-in", &e);
                self.commit(request, None, AuthState::Anonymous);
                return false;
            }
        };

        let scoped = self.client.scoped(Some(SessionTokens::from(&login.session)));
        let signed_in = match resolve(&scoped).await {
            Some(resolved) => self.commit_resolved(request, Some(resolved)),
            None => {
                self.commit(request, None, AuthState::Anonymous);
                false
            }
        };

        // Unresolved or superseded: the fresh session must not outlive us.
        if !signed_in {
            revoke(&scoped, "sign-in session").await;
        }
        signed_in
    }

    /// Revoke the session and drop local state.
    pub async fn sign_out(&self) {
        let request = self.begin();
        // An in-flight refresh may still rotate the installed pair.
        let _flight = self.refresh_flight.lock().await;
        if self.client.tokens().is_some()
            && let Err(e) = self.client.logout().await
        {
            tracing::warn!(error = %e, "sign-out request failed; clearing local session anyway");
        }
        self.commit(request, None, AuthState::Anonymous);
    }

    /// Re-resolve the session and refetch the profile.
    pub async fn refresh_user_data(&self) {
        let request = self.begin();
        let _flight = self.refresh_flight.lock().await;

        let Some(start) = self.client.tokens() else {
            self.commit(request, None, AuthState::Anonymous);
            return;
        };
        let scoped = self.client.scoped(Some(start.clone()));
        let resolved = resolve(&scoped).await;
        let rotated = scoped.tokens().filter(|tokens| *tokens != start);

        let committed = match resolved {
            Some(resolved) => self.commit_resolved(request, Some(resolved)),
            None => {
                // Committing `Anonymous` drops whatever was rotated.
                let signed_out = self.commit(request, None, AuthState::Anonymous);
                if signed_out && rotated.is_some() {
                    revoke(&scoped, "rotated session").await;
                }
                signed_out
            }
        };
        if committed {
            return;
        }

        if let Some(tokens) = rotated
            && !self.adopt_rotation(&start, tokens)
        {
            revoke(&scoped, "rotated session").await;
        }
    }
}

/// Best-effort revocation of the session held by `client`.
async fn revoke(client: &ApiClient, what: &str) {
    if let Err(e) = client.logout().await {
        tracing::warn!(error = %e, what, "failed to revoke session");
    }
}

/// Resolve the session held by `client` into tokens, session and profile.
async fn resolve(client: &ApiClient) -> Option<Resolved> {
    if client.tokens().is_some_and(|t| t.is_expired())
        && let Err(e) = client.refresh().await
    {
        log_failure("session refresh", &e);
        return None;
    }

    let me = match client.me().await {
        Ok(me) => me,
        Err(e) => {
            log_failure("profile fetch", &e);
            return None;
        }
    };

    if me.user.id != me.session.subject_id {
        tracing::warn!("profile does not belong to the session subject");
        return None;
    }

    Some(Resolved {
        tokens: client.tokens()?,
        session: me.session,
        profile: me.user,
    })
}

fn log_failure(operation: &str, error: &ClientError) {
    match error.status() {
        Some(status) if status.is_client_error() => {
            tracing::debug!(operation, %status, "rejected");
        }
        _ => tracing::warn!(operation, error = %error, "failed"),
    }
}
