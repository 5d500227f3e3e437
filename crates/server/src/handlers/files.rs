//! Public object URLs for stored binaries.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tyler_storage::guess_content_type;

use crate::error::ApiResult;
use crate::state::AppState;

/// GET /files/{*key} - Stream a stored binary.
///
/// Objects are public once stored; visibility is enforced on the ritual
/// metadata, never here.
pub async fn serve_file(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult<Response> {
    let meta = state.storage.head(&key).await?;
    let content_type = meta
        .content_type
        .unwrap_or_else(|| guess_content_type(&key).to_string());

    let stream = state
        .storage
        .get_stream(&key)
        .await?
        .map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type),
            (CONTENT_LENGTH, meta.size.to_string()),
            (CACHE_CONTROL, "public, max-age=3600".to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
