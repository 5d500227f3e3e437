//! Request helpers and test data.
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use super::server::{ADMIN_EMAIL, ADMIN_PASSWORD, TestServer};

/// Response pieces the tests look at.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// Value of a cookie set by this response (`""` when cleared).
    pub fn set_cookie(&self, name: &str) -> Option<String> {
        self.headers.get_all(SET_COOKIE).iter().find_map(|value| {
            let value = value.to_str().ok()?;
            let (pair, _) = value.split_once(';').unwrap_or((value, ""));
            let (cookie_name, cookie_value) = pair.split_once('=')?;
            (cookie_name == name).then(|| cookie_value.to_string())
        })
    }

    /// `Cookie` header replaying every non-empty cookie this response set.
    pub fn cookie_header(&self) -> String {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| {
                let value = value.to_str().ok()?;
                let pair = value.split(';').next()?;
                let (_, cookie_value) = pair.split_once('=')?;
                (!cookie_value.is_empty()).then(|| pair.to_string())
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Send a request through the router.
#[allow(dead_code)]
pub async fn send(router: &axum::Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    TestResponse {
        status,
        headers,
        body,
    }
}

/// Helper to make JSON requests, optionally carrying session cookies.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    cookies: Option<&str>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookies) = cookies {
        builder = builder.header(COOKIE, cookies);
    }
    let body = match body {
        Some(v) => {
            builder = builder.header(CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };
    send(router, builder.body(body).unwrap()).await
}

/// Helper to submit an HTML form.
#[allow(dead_code)]
pub async fn form_request(
    router: &axum::Router,
    uri: &str,
    fields: &[(&str, &str)],
    cookies: Option<&str>,
) -> TestResponse {
    let encoded = fields
        .iter()
        .map(|(k, v)| format!("{}={}", form_encode(k), form_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookies) = cookies {
        builder = builder.header(COOKIE, cookies);
    }
    send(router, builder.body(Body::from(encoded)).unwrap()).await
}

fn form_encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' => (b as char).to_string(),
            b' ' => "+".to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

/// GET a page or resource with optional cookies.
#[allow(dead_code)]
pub async fn get(router: &axum::Router, uri: &str, cookies: Option<&str>) -> TestResponse {
    json_request(router, "GET", uri, None, cookies).await
}

/// Sign in through the API and return the `Cookie` header for later requests.
#[allow(dead_code)]
pub async fn sign_in(server: &TestServer, email: &str, password: &str) -> String {
    let response = json_request(
        &server.router,
        "POST",
        "/api/auth/login",
        Some(json!({ "email": email, "password": password })),
        None,
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "sign-in failed: {}", response.text());
    response.cookie_header()
}

#[allow(dead_code)]
pub async fn sign_in_admin(server: &TestServer) -> String {
    sign_in(server, ADMIN_EMAIL, ADMIN_PASSWORD).await
}

/// Create a confirmed member through the admin API and return their id.
#[allow(dead_code)]
pub async fn create_member(
    server: &TestServer,
    admin_cookies: &str,
    email: &str,
    password: &str,
    degree: i32,
) -> String {
    let response = json_request(
        &server.router,
        "POST",
        "/api/users",
        Some(json!({
            "name": format!("Member {degree}"),
            "email": email,
            "password": password,
            "degree": degree,
            "lodge": "Lodge No. 1",
        })),
        Some(admin_cookies),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED, "create failed: {}", response.text());
    response.json()["user"]["id"].as_str().unwrap().to_string()
}

const BOUNDARY: &str = "tyler-test-boundary";

/// A multipart file part.
#[allow(dead_code)]
pub struct FilePart<'a> {
    pub file_name: &'a str,
    pub content_type: &'a str,
    pub data: &'a [u8],
}

/// Build a multipart/form-data request.
#[allow(dead_code)]
pub fn multipart_request(
    uri: &str,
    fields: &[(&str, &str)],
    file: Option<FilePart<'_>>,
    cookies: Option<&str>,
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(file) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                file.file_name, file.content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(file.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"));
    if let Some(cookies) = cookies {
        builder = builder.header(COOKIE, cookies);
    }
    builder.body(Body::from(body)).unwrap()
}

/// Upload a ritual through the API and return its JSON.
#[allow(dead_code)]
pub async fn upload_ritual(server: &TestServer, cookies: &str, name: &str, degree: &str) -> Value {
    let request = multipart_request(
        "/api/rituals",
        &[
            ("name", name),
            ("degree", degree),
            ("system", "Scottish"),
            ("language", "English"),
        ],
        Some(FilePart {
            file_name: "ritual.pdf",
            content_type: "application/pdf",
            data: b"%PDF-1.4 test document",
        }),
        Some(cookies),
    );
    let response = send(&server.router, request).await;
    assert_eq!(response.status, StatusCode::CREATED, "upload failed: {}", response.text());
    response.json()["ritual"].clone()
}
