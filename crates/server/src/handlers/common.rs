//! Shared handler helpers: request body parsing, multipart reading and
//! member provisioning.

use std::collections::HashMap;

use axum::Json;
use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use bytes::Bytes;
use time::OffsetDateTime;
use tyler_core::profile::validate_degree;
use tyler_core::{Profile, Role};
use tyler_identity::NewCredential;
use tyler_metadata::models::ProfileRow;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Unwrap a JSON body, turning extractor rejections into API errors.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Trimmed non-empty string, or `None`.
pub fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse a degree given as text.
pub fn parse_degree(value: &str) -> Option<i32> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|d| validate_degree(d).ok())
}

/// An uploaded file part.
#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Parsed multipart form: at most one `file` part plus text fields.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file: Option<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> Option<String> {
        non_empty(self.fields.get(name).map(String::as_str))
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

/// Read a multipart upload, rejecting files above `max_file_size` bytes.
pub async fn read_upload_form(mut multipart: Multipart, max_file_size: u64) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "file" {
            let file_name = field.file_name().unwrap_or("file").to_string();
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await.map_err(multipart_error)?;
            if data.len() as u64 > max_file_size {
                return Err(ApiError::PayloadTooLarge(format!(
                    "file exceeds the {max_file_size} byte limit"
                )));
            }
            form.file = Some(UploadedFile {
                file_name,
                content_type,
                data,
            });
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

/// Everything needed to create a member.
#[cfg_attr(test, derive(Debug))]
pub struct NewMember {
    pub name: String,
    pub email: String,
    pub password: String,
    pub degree: i32,
    pub lodge: Option<String>,
    pub role: Role,
    /// Unconfirmed members cannot sign in until an admin approves them.
    pub confirmed: bool,
}

/// Create the credential, then the profile. If the profile insert fails the
/// credential is deleted again and a single consistency error is returned.
pub async fn provision_member(state: &AppState, member: NewMember) -> ApiResult<Profile> {
    let credential = state
        .identity
        .create_credential(NewCredential {
            email: &member.email,
            password: &member.password,
            confirmed: member.confirmed,
        })
        .await?;

    let now = OffsetDateTime::now_utc();
    let profile = Profile {
        id: credential.id,
        name: member.name,
        email: credential.email.clone(),
        degree: Some(member.degree),
        lodge: member.lodge,
        role: member.role,
        created_at: now,
        updated_at: now,
    };

    let primary = match state.metadata.create_profile(&ProfileRow::from(&profile)).await {
        Ok(()) => {
            tracing::info!(user_id = %profile.id, role = %profile.role, "member created");
            return Ok(profile);
        }
        Err(e) => e,
    };

    tracing::warn!(
        user_id = %credential.id,
        error = %primary,
        "profile creation failed, deleting credential"
    );
    let rollback = match state.identity.delete_credential(credential.id).await {
        Ok(()) => {
            metrics::record_rollback("succeeded");
            None
        }
        Err(e) => {
            metrics::record_rollback("failed");
            tracing::error!(user_id = %credential.id, error = %e, "credential rollback failed");
            Some(e.to_string())
        }
    };
    Err(ApiError::Consistency {
        primary: format!("profile creation failed: {primary}"),
        rollback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  a ")), Some("a".to_string()));
        assert_eq!(non_empty(Some("   ")), None);
        assert_eq!(non_empty(None), None);
    }

    #[test]
    fn test_parse_degree() {
        assert_eq!(parse_degree("3"), Some(3));
        assert_eq!(parse_degree(" 33 "), Some(33));
        assert_eq!(parse_degree("0"), None);
        assert_eq!(parse_degree("-1"), None);
        assert_eq!(parse_degree("three"), None);
    }

    #[test]
    fn test_upload_form_field_trims() {
        let mut form = UploadForm::default();
        form.fields.insert("name".into(), "  Opening  ".into());
        form.fields.insert("author".into(), " ".into());
        assert_eq!(form.field("name").as_deref(), Some("Opening"));
        assert_eq!(form.field("author"), None);
        assert_eq!(form.field("missing"), None);
    }
}
