//! Integration tests for ritual listing, degree gating, upload and deletion.

mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::Value;

fn names(body: &Value) -> Vec<String> {
    let mut names: Vec<String> = body["rituals"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    names
}

/// Admin plus three rituals of degrees 1, 2 and 3.
async fn seeded() -> (TestServer, String, Vec<Value>) {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;
    let mut rituals = Vec::new();
    for degree in ["1", "2", "3"] {
        rituals.push(upload_ritual(&server, &admin, &format!("Degree {degree}"), degree).await);
    }
    (server, admin, rituals)
}

#[tokio::test]
async fn test_listing_is_degree_gated() {
    let (server, admin, _) = seeded().await;
    create_member(&server, &admin, "fellow@example.org", "fellow-pass", 2).await;
    let fellow = sign_in(&server, "fellow@example.org", "fellow-pass").await;

    let member_view = get(&server.router, "/api/rituals", Some(&fellow)).await;
    assert_eq!(member_view.status, StatusCode::OK);
    assert_eq!(names(&member_view.json()), vec!["Degree 1", "Degree 2"]);

    let admin_view = get(&server.router, "/api/rituals", Some(&admin)).await;
    assert_eq!(names(&admin_view.json()), vec!["Degree 1", "Degree 2", "Degree 3"]);

    let anonymous = get(&server.router, "/api/rituals", None).await;
    assert_eq!(anonymous.status, StatusCode::OK);
    assert!(names(&anonymous.json()).is_empty());
}

#[tokio::test]
async fn test_listing_filters_and_grouping() {
    let (server, admin, _) = seeded().await;

    let filtered = get(&server.router, "/api/rituals?degree=2", Some(&admin)).await;
    assert_eq!(names(&filtered.json()), vec!["Degree 2"]);

    let none = get(&server.router, "/api/rituals?language=French", Some(&admin)).await;
    assert!(names(&none.json()).is_empty());

    let grouped = get(&server.router, "/api/rituals?organizeBy=degree", Some(&admin)).await;
    assert_eq!(grouped.status, StatusCode::OK);
    let groups = grouped.json()["groups"].as_object().unwrap().clone();
    assert_eq!(groups.len(), 3);

    let newest_first = get(&server.router, "/api/rituals", Some(&admin)).await.json();
    assert_eq!(newest_first["rituals"][0]["name"], "Degree 3");

    let bad = get(&server.router, "/api/rituals?organizeBy=lodge", Some(&admin)).await;
    assert_eq!(bad.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_ritual_applies_policy() {
    let (server, admin, rituals) = seeded().await;
    create_member(&server, &admin, "fellow@example.org", "fellow-pass", 2).await;
    let fellow = sign_in(&server, "fellow@example.org", "fellow-pass").await;
    let third = format!("/api/rituals/{}", rituals[2]["id"].as_str().unwrap());
    let second = format!("/api/rituals/{}", rituals[1]["id"].as_str().unwrap());

    assert_eq!(get(&server.router, &second, Some(&fellow)).await.status, StatusCode::OK);
    assert_eq!(get(&server.router, &third, Some(&fellow)).await.status, StatusCode::FORBIDDEN);
    assert_eq!(get(&server.router, &third, Some(&admin)).await.status, StatusCode::OK);
    assert_eq!(get(&server.router, &third, None).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        get(&server.router, "/api/rituals/not-a-uuid", Some(&admin)).await.status,
        StatusCode::NOT_FOUND
    );

    let page = get(
        &server.router,
        &format!("/rituals/{}", rituals[2]["id"].as_str().unwrap()),
        Some(&fellow),
    )
    .await;
    assert_eq!(page.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_stats_count_visible_rituals() {
    let (server, admin, _) = seeded().await;
    create_member(&server, &admin, "fellow@example.org", "fellow-pass", 2).await;
    let fellow = sign_in(&server, "fellow@example.org", "fellow-pass").await;

    let stats = get(&server.router, "/api/rituals/stats", Some(&fellow)).await;
    assert_eq!(stats.status, StatusCode::OK);
    let body = stats.json();
    assert_eq!(body["total"], 2);
    assert_eq!(body["byDegree"]["1"], 1);
    assert_eq!(body["byDegree"]["2"], 1);
    assert!(body["byDegree"].get("3").is_none());

    assert_eq!(
        get(&server.router, "/api/rituals/stats", None).await.status,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_created_ritual_binary_is_served() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;

    let ritual = upload_ritual(&server, &admin, "Opening", "1").await;
    let key = ritual["fileKey"].as_str().unwrap();
    assert!(key.starts_with("rituals/1/"));
    assert!(key.ends_with("-ritual.pdf"));
    assert_eq!(ritual["author"], "Administrator");
    assert_eq!(ritual["contentType"], "application/pdf");

    let url = ritual["fileUrl"].as_str().unwrap();
    let file = get(&server.router, url, None).await;
    assert_eq!(file.status, StatusCode::OK);
    assert_eq!(file.body, b"%PDF-1.4 test document");
    assert_eq!(
        file.headers.get("content-type").unwrap().to_str().unwrap(),
        "application/pdf"
    );
}

#[tokio::test]
async fn test_create_ritual_validation() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;

    let request = multipart_request("/api/rituals", &[("name", "Incomplete")], None, Some(&admin));
    let response = send(&server.router, request).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let message = response.json()["error"].as_str().unwrap().to_string();
    for field in ["file", "degree", "system", "language"] {
        assert!(message.contains(field), "missing {field} in {message}");
    }
    assert!(!message.contains("name"));

    let anonymous = send(
        &server.router,
        multipart_request("/api/rituals", &[("name", "X")], None, None),
    )
    .await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_upload_endpoint_returns_location() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;

    let request = multipart_request(
        "/api/upload",
        &[],
        Some(FilePart {
            file_name: "notes for the Lodge.txt",
            content_type: "application/octet-stream",
            data: b"notes",
        }),
        Some(&admin),
    );
    let response = send(&server.router, request).await;

    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["size"], 5);
    assert_eq!(body["contentType"], "text/plain; charset=utf-8");
    let key = body["key"].as_str().unwrap();
    assert!(key.starts_with("rituals/unknown/"));
    assert!(key.ends_with("-notes_for_the_Lodge.txt"));
    assert!(body["url"].as_str().unwrap().starts_with("/files/"));
}

#[tokio::test]
async fn test_upload_size_limit() {
    let server = TestServer::with_config(|config| config.server.max_upload_size = 8).await;
    let admin = sign_in_admin(&server).await;

    let request = multipart_request(
        "/api/upload",
        &[],
        Some(FilePart {
            file_name: "big.pdf",
            content_type: "application/pdf",
            data: b"more than eight bytes",
        }),
        Some(&admin),
    );
    let response = send(&server.router, request).await;

    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_delete_ritual_removes_row_and_binary() {
    let (server, admin, rituals) = seeded().await;
    create_member(&server, &admin, "fellow@example.org", "fellow-pass", 3).await;
    let fellow = sign_in(&server, "fellow@example.org", "fellow-pass").await;
    let ritual = &rituals[0];
    let uri = format!("/api/rituals/{}", ritual["id"].as_str().unwrap());

    let forbidden = json_request(&server.router, "DELETE", &uri, None, Some(&fellow)).await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);

    let deleted = json_request(&server.router, "DELETE", &uri, None, Some(&admin)).await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.json()["success"], true);

    assert_eq!(get(&server.router, &uri, Some(&admin)).await.status, StatusCode::NOT_FOUND);
    let file = get(&server.router, ritual["fileUrl"].as_str().unwrap(), None).await;
    assert_eq!(file.status, StatusCode::NOT_FOUND);

    let again = json_request(&server.router, "DELETE", &uri, None, Some(&admin)).await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_survives_missing_binary() {
    let server = TestServer::new().await;
    let admin = sign_in_admin(&server).await;
    let ritual = upload_ritual(&server, &admin, "Opening", "1").await;
    server
        .state
        .storage
        .delete(ritual["fileKey"].as_str().unwrap())
        .await
        .unwrap();

    let deleted = json_request(
        &server.router,
        "DELETE",
        &format!("/api/rituals/{}", ritual["id"].as_str().unwrap()),
        None,
        Some(&admin),
    )
    .await;

    assert_eq!(deleted.status, StatusCode::OK);
}
