use httpmock::Method::{GET, POST};
use httpmock::{Mock, MockServer};
use serde_json::json;
use std::net::TcpListener;
use std::time::Duration;
use time::OffsetDateTime;
use tyler_cli::{ApiClient, AuthState, SessionCache, SessionTokens};

const ALICE_ID: &str = "00000000-0000-0000-0000-00000000000a";
const BOB_ID: &str = "00000000-0000-0000-0000-00000000000b";

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn cookie_for(tag: &str) -> String {
    format!("tyler-access-token=access-{tag}; tyler-refresh-token=refresh-{tag}")
}

fn session_json(tag: &str, subject: &str) -> serde_json::Value {
    json!({
        "accessToken": format!("access-{tag}"),
        "refreshToken": format!("refresh-{tag}"),
        "expiresAt": "2099-01-01T00:00:00Z",
        "subjectId": subject
    })
}

fn profile_json(id: &str, email: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": email,
        "email": email,
        "degree": 3,
        "lodge": null,
        "role": "user",
        "createdAt": "2024-01-01T00:00:00Z",
        "updatedAt": "2024-01-01T00:00:00Z"
    })
}

fn mock_login<'a>(server: &'a MockServer, email: &str, tag: &str, subject: &str, delay: u64) -> Mock<'a> {
    let email = email.to_string();
    let body = json!({
        "user": profile_json(subject, &email),
        "session": session_json(tag, subject)
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/auth/login").body_contains(email.as_str());
        then.status(200)
            .delay(Duration::from_millis(delay))
            .json_body(body);
    })
}

fn mock_me<'a>(server: &'a MockServer, tag: &str, subject: &str, profile_id: &str) -> Mock<'a> {
    let body = json!({
        "user": profile_json(profile_id, &format!("{tag}@example.org")),
        "session": {
            "sessionId": "00000000-0000-0000-0000-0000000000ff",
            "subjectId": subject,
            "expiresAt": "2099-01-01T00:00:00Z"
        }
    });
    let cookie = cookie_for(tag);
    server.mock(|when, then| {
        when.method(GET).path("/api/auth/me").header("cookie", cookie.as_str());
        then.status(200).json_body(body);
    })
}

fn mock_logout<'a>(server: &'a MockServer, tag: &str) -> Mock<'a> {
    let cookie = cookie_for(tag);
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/auth/logout")
            .header("cookie", cookie.as_str());
        then.status(200).json_body(json!({ "success": true }));
    })
}

fn mock_refresh<'a>(server: &'a MockServer, from: &str, to: &str, delay: u64) -> Mock<'a> {
    let cookie = cookie_for(from);
    let body = json!({ "session": session_json(to, ALICE_ID) });
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/auth/refresh")
            .header("cookie", cookie.as_str());
        then.status(200)
            .delay(Duration::from_millis(delay))
            .json_body(body);
    })
}

fn expired_client(server: &MockServer, tag: &str) -> ApiClient {
    let client = ApiClient::new(&server.base_url()).unwrap();
    client.install(Some(SessionTokens {
        access_token: format!("access-{tag}"),
        refresh_token: format!("refresh-{tag}"),
        expires_at: OffsetDateTime::now_utc() - time::Duration::minutes(1),
    }));
    client
}

fn cache_for(server: &MockServer) -> SessionCache {
    SessionCache::new(ApiClient::new(&server.base_url()).unwrap())
}

#[tokio::test]
async fn sign_in_installs_session_and_profile() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    mock_login(&server, "alice@example.org", "alice", ALICE_ID, 0);
    let me = mock_me(&server, "alice", ALICE_ID, ALICE_ID);
    let cache = cache_for(&server);
    let mut updates = cache.subscribe();

    assert_eq!(cache.state(), AuthState::Uninitialized);
    assert!(cache.sign_in("alice@example.org", "alice-pass").await);

    me.assert();
    assert!(updates.has_changed().unwrap());
    let state = updates.borrow_and_update().clone();
    assert_eq!(state.profile().unwrap().email, "alice@example.org");
    match state {
        AuthState::Authenticated { session, profile } => {
            assert_eq!(session.subject_id, profile.id);
        }
        other => panic!("unexpected state: {other:?}"),
    }
    assert_eq!(cache.client().tokens().unwrap().access_token, "access-alice");
}

#[tokio::test]
async fn rejected_sign_in_returns_false() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/auth/login");
        then.status(401).json_body(json!({
            "error": "Invalid email or password",
            "code": "invalid_credentials"
        }));
    });
    let cache = cache_for(&server);

    assert!(!cache.sign_in("alice@example.org", "wrong").await);
    assert_eq!(cache.state(), AuthState::Anonymous);
    assert!(cache.client().tokens().is_none());
}

#[tokio::test]
async fn transport_failure_returns_false() {
    // Nothing listens on the discard port.
    let cache = SessionCache::new(ApiClient::new("http://127.0.0.1:9").unwrap());

    assert!(!cache.sign_in("alice@example.org", "alice-pass").await);
    assert_eq!(cache.state(), AuthState::Anonymous);
}

#[tokio::test]
async fn profile_of_another_subject_is_refused() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    mock_login(&server, "alice@example.org", "alice", ALICE_ID, 0);
    mock_me(&server, "alice", ALICE_ID, BOB_ID);
    let revoke = mock_logout(&server, "alice");
    let cache = cache_for(&server);

    assert!(!cache.sign_in("alice@example.org", "alice-pass").await);
    assert_eq!(cache.state(), AuthState::Anonymous);
    assert!(cache.client().tokens().is_none());
    revoke.assert();
}

#[tokio::test]
async fn overlapping_sign_ins_keep_the_latest() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    mock_login(&server, "alice@example.org", "alice", ALICE_ID, 300);
    mock_login(&server, "bob@example.org", "bob", BOB_ID, 0);
    mock_me(&server, "alice", ALICE_ID, ALICE_ID);
    mock_me(&server, "bob", BOB_ID, BOB_ID);
    let revoke_stale = mock_logout(&server, "alice");
    let cache = cache_for(&server);

    let (first, second) = tokio::join!(
        cache.sign_in("alice@example.org", "alice-pass"),
        cache.sign_in("bob@example.org", "bob-pass"),
    );

    assert!(!first);
    assert!(second);
    assert!(cache.state().is_settled());
    assert_eq!(cache.state().profile().unwrap().email, "bob@example.org");
    assert_eq!(cache.client().tokens().unwrap().access_token, "access-bob");
    revoke_stale.assert();
}

#[tokio::test]
async fn refresh_user_data_redeems_expired_tokens() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let refresh = mock_refresh(&server, "old", "new", 0);
    mock_me(&server, "new", ALICE_ID, ALICE_ID);
    let cache = SessionCache::new(expired_client(&server, "old"));

    cache.refresh_user_data().await;

    refresh.assert();
    assert!(matches!(cache.state(), AuthState::Authenticated { .. }));
    assert_eq!(cache.client().tokens().unwrap().access_token, "access-new");
}

#[tokio::test]
async fn failed_refresh_ends_in_anonymous() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/auth/me");
        then.status(401).json_body(json!({
            "error": "authentication required",
            "code": "unauthenticated"
        }));
    });
    let client = ApiClient::new(&server.base_url()).unwrap();
    client.install(Some(SessionTokens {
        access_token: "access-revoked".to_string(),
        refresh_token: "refresh-revoked".to_string(),
        expires_at: OffsetDateTime::now_utc() + time::Duration::hours(1),
    }));
    let cache = SessionCache::new(client);

    assert_eq!(cache.initialize().await, AuthState::Anonymous);
    assert!(cache.client().tokens().is_none());
}

#[tokio::test]
async fn initialize_without_tokens_makes_no_requests() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let me = server.mock(|when, then| {
        when.method(GET).path("/api/auth/me");
        then.status(200);
    });
    let cache = cache_for(&server);

    assert_eq!(cache.initialize().await, AuthState::Anonymous);
    assert_eq!(me.hits(), 0);
}

#[tokio::test]
async fn sign_out_clears_state_even_when_revocation_fails() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    mock_login(&server, "alice@example.org", "alice", ALICE_ID, 0);
    mock_me(&server, "alice", ALICE_ID, ALICE_ID);
    let logout = server.mock(|when, then| {
        when.method(POST).path("/api/auth/logout");
        then.status(500).json_body(json!({
            "error": "internal server error",
            "code": "internal_error"
        }));
    });
    let cache = cache_for(&server);
    assert!(cache.sign_in("alice@example.org", "alice-pass").await);

    cache.sign_out().await;

    logout.assert();
    assert_eq!(cache.state(), AuthState::Anonymous);
    assert!(cache.client().tokens().is_none());
}

#[tokio::test]
async fn refresh_user_data_is_stable_without_changes() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    mock_login(&server, "alice@example.org", "alice", ALICE_ID, 0);
    let me = mock_me(&server, "alice", ALICE_ID, ALICE_ID);
    let cache = cache_for(&server);
    assert!(cache.sign_in("alice@example.org", "alice-pass").await);

    cache.refresh_user_data().await;
    let first = cache.state();
    cache.refresh_user_data().await;
    let second = cache.state();

    me.assert_hits(3);
    assert!(first.profile().is_some());
    assert_eq!(first, second);
    assert_eq!(cache.client().tokens().unwrap().access_token, "access-alice");
}

#[tokio::test]
async fn concurrent_refreshes_redeem_the_refresh_token_once() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let refresh = mock_refresh(&server, "old", "new", 200);
    mock_me(&server, "new", ALICE_ID, ALICE_ID);
    let logout = server.mock(|when, then| {
        when.method(POST).path("/api/auth/logout");
        then.status(200).json_body(json!({ "success": true }));
    });
    let cache = SessionCache::new(expired_client(&server, "old"));

    tokio::join!(cache.refresh_user_data(), cache.refresh_user_data());

    refresh.assert_hits(1);
    assert_eq!(logout.hits(), 0);
    assert!(matches!(cache.state(), AuthState::Authenticated { .. }));
    assert_eq!(cache.client().tokens().unwrap().access_token, "access-new");
}

#[tokio::test]
async fn sign_out_during_refresh_revokes_the_rotated_session() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let refresh = mock_refresh(&server, "old", "new", 200);
    mock_me(&server, "new", ALICE_ID, ALICE_ID);
    let revoke_new = mock_logout(&server, "new");
    let cache = SessionCache::new(expired_client(&server, "old"));

    tokio::join!(cache.refresh_user_data(), cache.sign_out());

    refresh.assert();
    revoke_new.assert();
    assert_eq!(cache.state(), AuthState::Anonymous);
    assert!(cache.client().tokens().is_none());
}

#[tokio::test]
async fn sign_in_without_profile_revokes_the_new_session() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    mock_login(&server, "alice@example.org", "alice", ALICE_ID, 0);
    server.mock(|when, then| {
        when.method(GET).path("/api/auth/me");
        then.status(500).json_body(json!({
            "error": "internal server error",
            "code": "internal_error"
        }));
    });
    let revoke = mock_logout(&server, "alice");
    let cache = cache_for(&server);

    assert!(!cache.sign_in("alice@example.org", "alice-pass").await);

    revoke.assert();
    assert_eq!(cache.state(), AuthState::Anonymous);
    assert!(cache.client().tokens().is_none());
}
