//! Integration tests for member administration.

mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::json;
use time::OffsetDateTime;
use tyler_core::{Profile, Role, UserId};
use tyler_metadata::models::{CredentialRow, ProfileRow};
use uuid::Uuid;

#[tokio::test]
async fn test_admin_create_applies_defaults_and_temporary_password() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;

    let response = json_request(
        &server.router,
        "POST",
        "/api/users",
        Some(json!({ "name": "Apprentice", "email": "Apprentice@Example.org" })),
        Some(&admin),
    )
    .await;

    assert_eq!(response.status, StatusCode::CREATED);
    let body = response.json();
    assert_eq!(body["user"]["email"], "apprentice@example.org");
    assert_eq!(body["user"]["degree"], 1);
    assert_eq!(body["user"]["role"], "user");
    let password = body["temporaryPassword"].as_str().unwrap().to_string();
    assert_eq!(password.len(), 8);
    assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));

    // Admin-created members are confirmed immediately.
    let cookies = sign_in(&server, "apprentice@example.org", &password).await;
    let me = get(&server.router, "/api/auth/me", Some(&cookies)).await;
    assert_eq!(me.json()["user"]["id"], body["user"]["id"]);
}

#[tokio::test]
async fn test_admin_create_with_password_omits_temporary_password() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;

    let response = json_request(
        &server.router,
        "POST",
        "/api/users",
        Some(json!({
            "name": "Warden",
            "email": "warden@example.org",
            "password": "warden-pass",
            "degree": 3,
            "role": "admin",
        })),
        Some(&admin),
    )
    .await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert!(response.json().get("temporaryPassword").is_none());
    assert_eq!(response.json()["user"]["role"], "admin");
}

#[tokio::test]
async fn test_create_user_guards() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;
    create_member(&server, &admin, "member@example.org", "member-pass", 2).await;
    let member = sign_in(&server, "member@example.org", "member-pass").await;
    let body = json!({ "name": "X", "email": "x@example.org" });

    let anonymous = json_request(&server.router, "POST", "/api/users", Some(body.clone()), None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let forbidden =
        json_request(&server.router, "POST", "/api/users", Some(body), Some(&member)).await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);

    let invalid = json_request(
        &server.router,
        "POST",
        "/api/users",
        Some(json!({ "name": "X", "email": "x@example.org", "role": "grand-master" })),
        Some(&admin),
    )
    .await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    assert!(invalid.json()["error"].as_str().unwrap().contains("role"));
}

#[tokio::test]
async fn test_failed_profile_creation_rolls_back_credential() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;

    // An orphaned profile already holds the email, so the profile insert fails.
    let now = OffsetDateTime::now_utc();
    let orphan = Profile {
        id: UserId::new(),
        name: "Orphan".to_string(),
        email: "orphan@example.org".to_string(),
        degree: Some(1),
        lodge: None,
        role: Role::User,
        created_at: now,
        updated_at: now,
    };
    server
        .metadata()
        .create_profile(&ProfileRow::from(&orphan))
        .await
        .unwrap();

    let response = json_request(
        &server.router,
        "POST",
        "/api/users",
        Some(json!({
            "name": "Second",
            "email": "orphan@example.org",
            "password": "second-pass",
        })),
        Some(&admin),
    )
    .await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json()["code"], "consistency_error");

    // No credential survived: signing in fails generically.
    let login = json_request(
        &server.router,
        "POST",
        "/api/auth/login",
        Some(json!({ "email": "orphan@example.org", "password": "second-pass" })),
        None,
    )
    .await;
    assert_eq!(login.status, StatusCode::UNAUTHORIZED);
    assert!(
        server
            .metadata()
            .get_credential_by_email("orphan@example.org")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_failed_credential_update_restores_profile() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;
    let id = create_member(&server, &admin, "member@example.org", "member-pass", 2).await;

    // A credential without a profile already holds the email, so only the
    // credential write fails.
    let now = OffsetDateTime::now_utc();
    server
        .metadata()
        .create_credential(&CredentialRow {
            credential_id: Uuid::new_v4(),
            email: "orphan@example.org".to_string(),
            password_hash: "unused".to_string(),
            confirmed: true,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    let uri = format!("/api/users/{id}");
    let response = json_request(
        &server.router,
        "PUT",
        &uri,
        Some(json!({
            "name": "Renamed",
            "email": "orphan@example.org",
            "degree": 18,
            "password": "reset-pass",
            "confirmed": false,
        })),
        Some(&admin),
    )
    .await;

    assert_eq!(response.status, StatusCode::CONFLICT);
    let user = get(&server.router, &uri, Some(&admin)).await.json();
    assert_eq!(user["user"]["name"], "Member 2");
    assert_eq!(user["user"]["email"], "member@example.org");
    assert_eq!(user["user"]["degree"], 2);
    // Password, confirmation and sessions are untouched.
    sign_in(&server, "member@example.org", "member-pass").await;
}

#[tokio::test]
async fn test_list_and_get_users() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;
    let id = create_member(&server, &admin, "member@example.org", "member-pass", 2).await;
    let member = sign_in(&server, "member@example.org", "member-pass").await;

    let list = get(&server.router, "/api/users", Some(&member)).await;
    assert_eq!(list.status, StatusCode::OK);
    assert_eq!(list.json()["users"].as_array().unwrap().len(), 2);

    let one = get(&server.router, &format!("/api/users/{id}"), Some(&member)).await;
    assert_eq!(one.status, StatusCode::OK);
    assert_eq!(one.json()["user"]["email"], "member@example.org");

    let missing = get(
        &server.router,
        &format!("/api/users/{}", UserId::new()),
        Some(&member),
    )
    .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let anonymous = get(&server.router, "/api/users", None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_member_may_only_rename_and_change_own_password() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;
    let id = create_member(&server, &admin, "member@example.org", "member-pass", 2).await;
    let other = create_member(&server, &admin, "other@example.org", "other-pass", 2).await;
    let member = sign_in(&server, "member@example.org", "member-pass").await;
    let uri = format!("/api/users/{id}");

    let renamed = json_request(
        &server.router,
        "PUT",
        &uri,
        Some(json!({ "name": "  Renamed  " })),
        Some(&member),
    )
    .await;
    assert_eq!(renamed.status, StatusCode::OK);
    assert_eq!(renamed.json()["user"]["name"], "Renamed");

    for body in [
        json!({ "degree": 33 }),
        json!({ "role": "admin" }),
        json!({ "name": "Sneaky", "lodge": "Elsewhere" }),
        json!({ "confirmed": true }),
    ] {
        let response = json_request(&server.router, "PUT", &uri, Some(body.clone()), Some(&member)).await;
        assert_eq!(response.status, StatusCode::FORBIDDEN, "body {body}");
    }

    let foreign = json_request(
        &server.router,
        "PUT",
        &format!("/api/users/{other}"),
        Some(json!({ "name": "Hijacked" })),
        Some(&member),
    )
    .await;
    assert_eq!(foreign.status, StatusCode::FORBIDDEN);

    let password = json_request(
        &server.router,
        "PUT",
        &uri,
        Some(json!({ "password": "new-member-pass" })),
        Some(&member),
    )
    .await;
    assert_eq!(password.status, StatusCode::OK);
    sign_in(&server, "member@example.org", "new-member-pass").await;

    // The member's own session survives their own password change.
    let me = get(&server.router, "/api/auth/me", Some(&member)).await;
    assert_eq!(me.status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_updates_profile_and_credential() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;
    let id = create_member(&server, &admin, "member@example.org", "member-pass", 2).await;
    let member = sign_in(&server, "member@example.org", "member-pass").await;

    let response = json_request(
        &server.router,
        "PUT",
        &format!("/api/users/{id}"),
        Some(json!({
            "email": "moved@example.org",
            "degree": 18,
            "lodge": null,
            "password": "reset-pass",
        })),
        Some(&admin),
    )
    .await;

    assert_eq!(response.status, StatusCode::OK);
    let user = &response.json()["user"];
    assert_eq!(user["email"], "moved@example.org");
    assert_eq!(user["degree"], 18);
    assert!(user["lodge"].is_null());

    // An admin reset ends the member's sessions.
    let me = get(&server.router, "/api/auth/me", Some(&member)).await;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
    sign_in(&server, "moved@example.org", "reset-pass").await;
}

#[tokio::test]
async fn test_invalid_update_rejected() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;
    let id = create_member(&server, &admin, "member@example.org", "member-pass", 2).await;
    let uri = format!("/api/users/{id}");

    let empty = json_request(&server.router, "PUT", &uri, Some(json!({})), Some(&admin)).await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);

    let degree = json_request(
        &server.router,
        "PUT",
        &uri,
        Some(json!({ "degree": 0 })),
        Some(&admin),
    )
    .await;
    assert_eq!(degree.status, StatusCode::BAD_REQUEST);

    let taken = json_request(
        &server.router,
        "PUT",
        &uri,
        Some(json!({ "email": ADMIN_EMAIL })),
        Some(&admin),
    )
    .await;
    assert_eq!(taken.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_suspension_ends_sessions() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;
    let id = create_member(&server, &admin, "member@example.org", "member-pass", 2).await;
    let member = sign_in(&server, "member@example.org", "member-pass").await;

    let suspend = json_request(
        &server.router,
        "PUT",
        &format!("/api/users/{id}"),
        Some(json!({ "confirmed": false })),
        Some(&admin),
    )
    .await;
    assert_eq!(suspend.status, StatusCode::OK);

    let me = get(&server.router, "/api/auth/me", Some(&member)).await;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);

    let login = json_request(
        &server.router,
        "POST",
        "/api/auth/login",
        Some(json!({ "email": "member@example.org", "password": "member-pass" })),
        None,
    )
    .await;
    assert_eq!(login.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_delete_user_removes_credential_and_profile() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;
    let id = create_member(&server, &admin, "member@example.org", "member-pass", 2).await;
    let member = sign_in(&server, "member@example.org", "member-pass").await;
    let ritual = upload_ritual(&server, &member, "Opening", "1").await;
    let uri = format!("/api/users/{id}");

    let forbidden = json_request(&server.router, "DELETE", &uri, None, Some(&member)).await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);

    let deleted = json_request(&server.router, "DELETE", &uri, None, Some(&admin)).await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.json()["success"], true);

    assert_eq!(get(&server.router, &uri, Some(&admin)).await.status, StatusCode::NOT_FOUND);
    assert_eq!(
        get(&server.router, "/api/auth/me", Some(&member)).await.status,
        StatusCode::UNAUTHORIZED
    );
    let login = json_request(
        &server.router,
        "POST",
        "/api/auth/login",
        Some(json!({ "email": "member@example.org", "password": "member-pass" })),
        None,
    )
    .await;
    assert_eq!(login.status, StatusCode::UNAUTHORIZED);

    // Their rituals stay, detached from the deleted owner.
    let kept = get(
        &server.router,
        &format!("/api/rituals/{}", ritual["id"].as_str().unwrap()),
        Some(&admin),
    )
    .await;
    assert_eq!(kept.status, StatusCode::OK);
    assert!(kept.json()["ritual"]["ownerId"].is_null());

    let again = json_request(&server.router, "DELETE", &uri, None, Some(&admin)).await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_cannot_delete_self() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;
    let me = get(&server.router, "/api/auth/me", Some(&admin)).await;
    let id = me.json()["user"]["id"].as_str().unwrap().to_string();

    let response = json_request(
        &server.router,
        "DELETE",
        &format!("/api/users/{id}"),
        None,
        Some(&admin),
    )
    .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}
