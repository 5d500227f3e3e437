//! API error types.

use axum::Json;
use axum::body::Body;
use axum::http::StatusCode;
use axum::http::header::CONTENT_LENGTH;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tyler_identity::IdentityError;
use tyler_metadata::MetadataError;
use tyler_storage::StorageError;

/// API error response.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorResponse {
    /// Message safe to show to any caller.
    pub error: String,
    /// Error code for programmatic handling.
    pub code: &'static str,
    /// Full internal error text, only when detail exposure is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// A multi-step operation failed part way. `rollback` carries the failure
    /// of the compensating action, if it failed too.
    #[error("{primary}{}", rollback_suffix(.rollback))]
    Consistency {
        primary: String,
        rollback: Option<String>,
    },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("{0}")]
    Core(#[from] tyler_core::Error),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
}

fn rollback_suffix(rollback: &Option<String>) -> String {
    match rollback {
        Some(failure) => format!(" (rollback failed: {failure})"),
        None => String::new(),
    }
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Consistency { .. } => "consistency_error",
            Self::Internal(_) => "internal_error",
            Self::Storage(e) => match e {
                StorageError::NotFound(_) => "not_found",
                StorageError::InvalidKey(_) => "bad_request",
                _ => "storage_error",
            },
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => "not_found",
                MetadataError::AlreadyExists(_) | MetadataError::Constraint(_) => "conflict",
                _ => "metadata_error",
            },
            Self::Core(e) => match e {
                tyler_core::Error::Validation(_) | tyler_core::Error::InvalidDegree(_) => {
                    "validation_error"
                }
                _ => "bad_request",
            },
            Self::Identity(e) => match e {
                IdentityError::InvalidCredentials => "invalid_credentials",
                IdentityError::PendingApproval => "pending_approval",
                IdentityError::EmailTaken => "conflict",
                IdentityError::NotFound(_) => "not_found",
                IdentityError::WeakPassword { .. } | IdentityError::InvalidEmail(_) => {
                    "validation_error"
                }
                _ => "identity_error",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Consistency { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::InvalidKey(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                MetadataError::Constraint(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
            Self::Identity(e) => match e {
                IdentityError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                IdentityError::PendingApproval => StatusCode::FORBIDDEN,
                IdentityError::EmailTaken => StatusCode::CONFLICT,
                IdentityError::NotFound(_) => StatusCode::NOT_FOUND,
                IdentityError::WeakPassword { .. } | IdentityError::InvalidEmail(_) => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Message returned to the caller. Server-side failures stay generic.
    pub fn public_message(&self) -> String {
        match self {
            Self::Consistency { .. } => {
                "the operation failed part way; see server logs".to_string()
            }
            Self::Identity(IdentityError::InvalidCredentials) => {
                "invalid email or password".to_string()
            }
            Self::Identity(IdentityError::PendingApproval) => {
                "account pending approval".to_string()
            }
            Self::Identity(IdentityError::EmailTaken) => "email already registered".to_string(),
            _ if self.status_code().is_server_error() => match self {
                Self::Storage(_) => "object storage unavailable".to_string(),
                Self::Metadata(_) | Self::Identity(_) => "data store unavailable".to_string(),
                _ => "internal server error".to_string(),
            },
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }

        let body = ErrorResponse {
            error: self.public_message(),
            code: self.code(),
            detail: None,
        };
        let detailed = ErrorResponse {
            detail: Some(self.to_string()),
            ..body.clone()
        };
        let mut response = (status, Json(body)).into_response();
        // Picked up by `expose_error_detail` when enabled.
        response.extensions_mut().insert(detailed);
        response
    }
}

/// Replace an error body with its detailed variant, if the response carries one.
pub fn expose_error_detail(response: Response) -> Response {
    let Some(detailed) = response.extensions().get::<ErrorResponse>().cloned() else {
        return response;
    };
    let Ok(bytes) = serde_json::to_vec(&detailed) else {
        return response;
    };
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(bytes))
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::Validation(vec!["email".into()]).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthenticated("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Identity(IdentityError::PendingApproval).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Identity(IdentityError::EmailTaken).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Consistency {
                primary: "p".into(),
                rollback: None
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_consistency_message_mentions_rollback_failure() {
        let err = ApiError::Consistency {
            primary: "profile insert failed".into(),
            rollback: Some("credential delete failed".into()),
        };
        let text = err.to_string();
        assert!(text.contains("profile insert failed"));
        assert!(text.contains("rollback failed: credential delete failed"));
    }

    #[tokio::test]
    async fn test_server_errors_hide_detail_by_default() {
        let err = ApiError::Metadata(MetadataError::Internal("disk on fire".into()));
        let body = body_json(err.into_response()).await;
        assert_eq!(body["code"], "metadata_error");
        assert_eq!(body["error"], "data store unavailable");
        assert!(body.get("detail").is_none());
    }

    #[tokio::test]
    async fn test_expose_error_detail() {
        let err = ApiError::Internal("boom".into());
        let response = expose_error_detail(err.into_response());
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "internal server error");
        assert_eq!(body["detail"], "internal error: boom");
    }

    #[tokio::test]
    async fn test_validation_lists_fields() {
        let err = ApiError::Validation(vec!["email".into(), "password".into()]);
        let body = body_json(err.into_response()).await;
        assert_eq!(body["code"], "validation_error");
        assert_eq!(body["error"], "validation failed: email, password");
    }
}
