//! Minimal server-rendered pages.
//!
//! Pages never surface raw errors: every failure becomes a short message on an
//! error page with the matching status code.

use std::fmt::Write as _;

use axum::Form;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;
use tyler_core::ritual::{KNOWN_LANGUAGES, KNOWN_SYSTEMS};
use tyler_core::{Profile, Ritual, RitualFilter, SIGN_IN_PATH, policy};
use tyler_identity::IdentityError;

use crate::auth::{SessionResolution, optional_profile};
use crate::cookies;
use crate::error::{ApiError, ApiResult};
use crate::handlers::auth::{RegisterRequest, registration_member, revoke_presented, sign_in_member};
use crate::handlers::common::provision_member;
use crate::handlers::health::SessionDiagnostics;
use crate::handlers::rituals::{
    ListRitualsQuery, RitualAccess, RitualStats, ritual_for_viewer, visible_rituals,
};
use crate::handlers::users::all_profiles;
use crate::state::AppState;

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn layout(title: &str, viewer: Option<&Profile>, body: &str) -> Html<String> {
    let mut nav = String::new();
    if let Some(profile) = viewer {
        nav.push_str(r#"<a href="/">Dashboard</a> | <a href="/rituals">Rituals</a>"#);
        if policy::can_manage_users(profile) {
            nav.push_str(r#" | <a href="/admin/users">Members</a>"#);
        }
        let _ = write!(
            nav,
            r#" | {} <form method="post" action="/logout" style="display:inline"><button type="submit">Sign out</button></form>"#,
            escape_html(&profile.name)
        );
    }
    Html(format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>{title} - Tyler</title></head>\
         <body><nav>{nav}</nav><main><h1>{title}</h1>{body}</main></body></html>",
        title = escape_html(title),
    ))
}

fn message_page(status: StatusCode, title: &str, message: &str, viewer: Option<&Profile>) -> Response {
    let body = format!("<p>{}</p>", escape_html(message));
    (status, layout(title, viewer, &body)).into_response()
}

fn error_page(err: ApiError, viewer: Option<&Profile>) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        tracing::error!(error = %err, "page failed");
    } else {
        tracing::debug!(error = %err, "page rejected");
    }
    let title = match status {
        StatusCode::FORBIDDEN => "Access denied",
        StatusCode::NOT_FOUND => "Not found",
        StatusCode::UNAUTHORIZED => "Sign-in required",
        _ => "Something went wrong",
    };
    message_page(status, title, &err.public_message(), viewer)
}

fn forbidden_page(viewer: Option<&Profile>, message: &str) -> Response {
    message_page(StatusCode::FORBIDDEN, "Access denied", message, viewer)
}

/// Profile of the signed-in caller. The gatekeeper has already redirected
/// anonymous visitors, so a missing profile means an account without one.
async fn page_viewer(state: &AppState, resolution: &SessionResolution) -> Result<Profile, Response> {
    match optional_profile(state, resolution).await {
        Ok(Some(profile)) => Ok(profile),
        Ok(None) => Err(forbidden_page(None, "No member profile exists for this account.")),
        Err(e) => Err(error_page(e, None)),
    }
}

fn degree_label(degree: Option<i32>) -> String {
    match degree {
        Some(d) => d.to_string(),
        None => "unlisted".to_string(),
    }
}

fn ritual_rows(rituals: &[Ritual]) -> String {
    if rituals.is_empty() {
        return "<p>No rituals to show.</p>".to_string();
    }
    let mut html = String::from(
        "<table><thead><tr><th>Name</th><th>Degree</th><th>System</th><th>Language</th><th>Author</th></tr></thead><tbody>",
    );
    for ritual in rituals {
        let _ = write!(
            html,
            r#"<tr><td><a href="/rituals/{id}">{name}</a></td><td>{degree}</td><td>{system}</td><td>{language}</td><td>{author}</td></tr>"#,
            id = ritual.id,
            name = escape_html(&ritual.name),
            degree = degree_label(ritual.degree),
            system = escape_html(&ritual.system),
            language = escape_html(&ritual.language),
            author = escape_html(&ritual.author),
        );
    }
    html.push_str("</tbody></table>");
    html
}

/// GET / - Dashboard with statistics over the caller's visible rituals.
pub async fn dashboard(State(state): State<AppState>, resolution: SessionResolution) -> Response {
    let viewer = match page_viewer(&state, &resolution).await {
        Ok(viewer) => viewer,
        Err(response) => return response,
    };
    let rituals = match visible_rituals(&state, Some(&viewer), &RitualFilter::default()).await {
        Ok(rituals) => rituals,
        Err(e) => return error_page(e, Some(&viewer)),
    };
    let stats = RitualStats::from_rituals(&rituals);

    let mut body = format!(
        "<p>Welcome, {}. Degree {}.</p><p>{} rituals available to you.</p><ul>",
        escape_html(&viewer.name),
        degree_label(viewer.degree),
        stats.total
    );
    for (degree, count) in &stats.by_degree {
        let _ = write!(body, "<li>Degree {}: {count}</li>", escape_html(degree));
    }
    body.push_str("</ul><h2>Latest</h2>");
    body.push_str(&ritual_rows(&rituals[..rituals.len().min(5)]));
    layout("Dashboard", Some(&viewer), &body).into_response()
}

fn filter_form(query: &ListRitualsQuery) -> String {
    fn options(selected: Option<&str>, values: &[&str]) -> String {
        let mut html = String::from(r#"<option value="">Any</option>"#);
        for value in values {
            let marker = if selected == Some(*value) { " selected" } else { "" };
            let _ = write!(html, r#"<option{marker}>{}</option>"#, escape_html(value));
        }
        html
    }
    format!(
        r#"<form method="get" action="/rituals">Degree <input name="degree" size="3" value="{degree}"> System <select name="system">{systems}</select> Language <select name="language">{languages}</select> <button type="submit">Filter</button></form>"#,
        degree = escape_html(query.degree.as_deref().unwrap_or("")),
        systems = options(query.system.as_deref(), KNOWN_SYSTEMS),
        languages = options(query.language.as_deref(), KNOWN_LANGUAGES),
    )
}

/// GET /rituals
pub async fn rituals_page(
    State(state): State<AppState>,
    resolution: SessionResolution,
    Query(query): Query<ListRitualsQuery>,
) -> Response {
    let viewer = match page_viewer(&state, &resolution).await {
        Ok(viewer) => viewer,
        Err(response) => return response,
    };
    let listing = async {
        let (filter, organize_by) = query.parse()?;
        let rituals = visible_rituals(&state, Some(&viewer), &filter).await?;
        ApiResult::Ok((rituals, organize_by))
    };
    let (rituals, organize_by) = match listing.await {
        Ok(listing) => listing,
        Err(e) => return error_page(e, Some(&viewer)),
    };

    let mut body = filter_form(&query);
    match organize_by {
        Some(by) => {
            for (group, members) in by.group(&rituals) {
                let _ = write!(body, "<h2>{}</h2>", escape_html(&group));
                body.push_str(&ritual_rows(&members));
            }
        }
        None => body.push_str(&ritual_rows(&rituals)),
    }
    layout("Rituals", Some(&viewer), &body).into_response()
}

/// GET /rituals/{id}
pub async fn ritual_page(
    State(state): State<AppState>,
    resolution: SessionResolution,
    Path(id): Path<String>,
) -> Response {
    let viewer = match page_viewer(&state, &resolution).await {
        Ok(viewer) => viewer,
        Err(response) => return response,
    };
    match ritual_for_viewer(&state, &viewer, &id).await {
        Ok(RitualAccess::Granted(ritual)) => {
            let body = format!(
                r#"<dl><dt>Degree</dt><dd>{degree}</dd><dt>System</dt><dd>{system}</dd><dt>Language</dt><dd>{language}</dd><dt>Author</dt><dd>{author}</dd></dl><p><a href="{url}">Open document</a></p>"#,
                degree = degree_label(ritual.degree),
                system = escape_html(&ritual.system),
                language = escape_html(&ritual.language),
                author = escape_html(&ritual.author),
                url = escape_html(&ritual.file_url),
            );
            layout(&ritual.name, Some(&viewer), &body).into_response()
        }
        Ok(RitualAccess::Denied) => forbidden_page(
            Some(&viewer),
            "Your degree does not grant access to this ritual.",
        ),
        Ok(RitualAccess::Unknown) => message_page(
            StatusCode::NOT_FOUND,
            "Not found",
            "No such ritual.",
            Some(&viewer),
        ),
        Err(e) => error_page(e, Some(&viewer)),
    }
}

/// GET /admin/users
pub async fn admin_users_page(State(state): State<AppState>, resolution: SessionResolution) -> Response {
    let viewer = match page_viewer(&state, &resolution).await {
        Ok(viewer) => viewer,
        Err(response) => return response,
    };
    if !policy::can_manage_users(&viewer) {
        return forbidden_page(Some(&viewer), "Only administrators can manage members.");
    }
    let users = match all_profiles(&state).await {
        Ok(users) => users,
        Err(e) => return error_page(e, Some(&viewer)),
    };

    let mut body = String::from(
        "<table><thead><tr><th>Name</th><th>Email</th><th>Degree</th><th>Lodge</th><th>Role</th></tr></thead><tbody>",
    );
    for user in &users {
        let _ = write!(
            body,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&user.name),
            escape_html(&user.email),
            degree_label(user.degree),
            escape_html(user.lodge.as_deref().unwrap_or("")),
            user.role,
        );
    }
    body.push_str("</tbody></table>");
    layout("Members", Some(&viewer), &body).into_response()
}

const LOGIN_FORM: &str = r#"<form method="post" action="/login"><p><label>Email <input type="email" name="email" required></label></p><p><label>Password <input type="password" name="password" required></label></p><p><button type="submit">Sign in</button></p></form><p><a href="/register">Request an account</a></p>"#;

fn login_view(status: StatusCode, notice: Option<&str>) -> Response {
    let mut body = String::new();
    if let Some(notice) = notice {
        let _ = write!(body, r#"<p role="alert">{}</p>"#, escape_html(notice));
    }
    body.push_str(LOGIN_FORM);
    (status, layout("Sign in", None, &body)).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginPageQuery {
    #[serde(default)]
    pub registered: Option<String>,
}

/// GET /login
pub async fn login_page(resolution: SessionResolution, Query(query): Query<LoginPageQuery>) -> Response {
    if resolution.verified().is_some() {
        return Redirect::to("/").into_response();
    }
    let notice = query
        .registered
        .map(|_| "Registration received. An administrator must approve your account before you can sign in.");
    login_view(StatusCode::OK, notice)
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// POST /login - Sign in and redirect to the dashboard.
pub async fn login_submit(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    let email = form.email.trim();
    if email.is_empty() || form.password.is_empty() {
        return login_view(StatusCode::BAD_REQUEST, Some("Email and password are required."));
    }

    match sign_in_member(&state, email, &form.password).await {
        Ok((_, session)) => {
            let mut response = Redirect::to("/").into_response();
            match cookies::session_cookies(&session, &state.config.auth, state.secure_cookies()) {
                Ok(values) => cookies::append_cookies(response.headers_mut(), values),
                Err(e) => return error_page(e, None),
            }
            response
        }
        Err(ApiError::Identity(IdentityError::InvalidCredentials)) => {
            login_view(StatusCode::UNAUTHORIZED, Some("Invalid email or password."))
        }
        Err(ApiError::Identity(IdentityError::PendingApproval)) => login_view(
            StatusCode::FORBIDDEN,
            Some("Your account is awaiting administrator approval."),
        ),
        Err(e) => {
            tracing::error!(error = %e, "sign-in page failed");
            login_view(
                e.status_code(),
                Some("Sign-in is unavailable right now. Please try again later."),
            )
        }
    }
}

const REGISTER_FORM: &str = r#"<form method="post" action="/register"><p><label>Name <input name="name" required></label></p><p><label>Email <input type="email" name="email" required></label></p><p><label>Password <input type="password" name="password" required></label></p><p><label>Degree <input name="degree" size="3" value="1"></label></p><p><label>Lodge <input name="lodge"></label></p><p><button type="submit">Register</button></p></form><p><a href="/login">Back to sign in</a></p>"#;

fn register_view(status: StatusCode, notice: Option<&str>) -> Response {
    let mut body = String::new();
    if let Some(notice) = notice {
        let _ = write!(body, r#"<p role="alert">{}</p>"#, escape_html(notice));
    }
    body.push_str(REGISTER_FORM);
    (status, layout("Request an account", None, &body)).into_response()
}

/// GET /register
pub async fn register_page(resolution: SessionResolution) -> Response {
    if resolution.verified().is_some() {
        return Redirect::to("/").into_response();
    }
    register_view(StatusCode::OK, None)
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub degree: String,
    #[serde(default)]
    pub lodge: String,
}

/// POST /register - Create an unconfirmed member and send them to sign-in.
pub async fn register_submit(State(state): State<AppState>, Form(form): Form<RegisterForm>) -> Response {
    let degree = match form.degree.trim() {
        "" => None,
        raw => match raw.parse::<i64>() {
            Ok(d) => Some(d),
            Err(_) => return register_view(StatusCode::BAD_REQUEST, Some("Degree must be a number.")),
        },
    };
    let request = RegisterRequest {
        name: Some(form.name),
        email: Some(form.email),
        password: Some(form.password),
        degree,
        lodge: Some(form.lodge),
    };

    let result = async {
        let member = registration_member(request, state.identity.min_password_length())?;
        provision_member(&state, member).await
    };
    match result.await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, "registration pending approval");
            Redirect::to(&format!("{SIGN_IN_PATH}?registered=1")).into_response()
        }
        Err(ApiError::Validation(fields)) => register_view(
            StatusCode::BAD_REQUEST,
            Some(&format!("Please check: {}.", fields.join(", "))),
        ),
        Err(e @ ApiError::Identity(IdentityError::EmailTaken)) => {
            register_view(e.status_code(), Some("That email is already registered."))
        }
        Err(e) => {
            tracing::error!(error = %e, "registration page failed");
            register_view(
                e.status_code(),
                Some("Registration is unavailable right now. Please try again later."),
            )
        }
    }
}

/// POST /logout - Revoke the session, clear cookies and return to sign-in.
pub async fn logout_submit(
    State(state): State<AppState>,
    resolution: SessionResolution,
    headers: HeaderMap,
) -> Response {
    revoke_presented(&state, &headers, &resolution).await;
    if let Some(subject) = resolution.subject() {
        tracing::info!(user_id = %subject, "signed out");
    }
    let mut response = Redirect::to(SIGN_IN_PATH).into_response();
    match cookies::cleared_cookies(state.secure_cookies()) {
        Ok(values) => cookies::append_cookies(response.headers_mut(), values),
        Err(e) => tracing::warn!(error = %e, "failed to build cleared cookies"),
    }
    response
}

/// GET /auth-debug - Break-glass HTML diagnostics.
pub async fn auth_debug_page(
    State(state): State<AppState>,
    resolution: SessionResolution,
    headers: HeaderMap,
) -> Response {
    let report = SessionDiagnostics::collect(&state, &headers, &resolution).await;
    let rendered = serde_json::to_string_pretty(&report)
        .unwrap_or_else(|e| format!("failed to render diagnostics: {e}"));
    let body = format!(
        r#"<pre>{}</pre><form method="post" action="/logout"><button type="submit">Clear session</button></form>"#,
        escape_html(&rendered)
    );
    layout("Session diagnostics", None, &body).into_response()
}
