//! Ritual document endpoints.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tyler_core::ritual::object_key;
use tyler_core::{OrganizeBy, Profile, Ritual, RitualFilter, RitualId, policy};
use tyler_metadata::models::RitualRow;
use tyler_storage::guess_content_type;

use crate::auth::{SessionResolution, optional_profile, require_admin, require_profile};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{UploadedFile, non_empty, parse_degree, read_upload_form};
use crate::metrics;
use crate::state::AppState;

/// Query parameters for listing rituals.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRitualsQuery {
    pub degree: Option<String>,
    pub system: Option<String>,
    pub language: Option<String>,
    pub organize_by: Option<String>,
}

impl ListRitualsQuery {
    /// Build the listing filter and grouping.
    pub fn parse(&self) -> ApiResult<(RitualFilter, Option<OrganizeBy>)> {
        let degree = match non_empty(self.degree.as_deref()) {
            Some(raw) => Some(
                parse_degree(&raw).ok_or_else(|| ApiError::Validation(vec!["degree".to_string()]))?,
            ),
            None => None,
        };
        let organize_by = match non_empty(self.organize_by.as_deref()) {
            Some(raw) => Some(OrganizeBy::parse(&raw)?),
            None => None,
        };
        let filter = RitualFilter {
            degree,
            system: non_empty(self.system.as_deref()),
            language: non_empty(self.language.as_deref()),
        };
        Ok((filter, organize_by))
    }
}

#[derive(Debug, Serialize)]
pub struct ListRitualsResponse {
    pub rituals: Vec<Ritual>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<BTreeMap<String, Vec<Ritual>>>,
}

/// Rituals matching `filter` that `viewer` may see, newest first.
pub async fn visible_rituals(
    state: &AppState,
    viewer: Option<&Profile>,
    filter: &RitualFilter,
) -> ApiResult<Vec<Ritual>> {
    if viewer.is_none() {
        return Ok(Vec::new());
    }
    let rows = state.metadata.list_rituals(filter).await?;
    let rituals = filter.apply(rows.into_iter().map(Ritual::from).collect());
    Ok(policy::visible_documents(viewer, rituals))
}

/// GET /api/rituals
pub async fn list_rituals(
    State(state): State<AppState>,
    resolution: SessionResolution,
    Query(query): Query<ListRitualsQuery>,
) -> ApiResult<Json<ListRitualsResponse>> {
    let (filter, organize_by) = query.parse()?;
    let viewer = optional_profile(&state, &resolution).await?;
    let rituals = visible_rituals(&state, viewer.as_ref(), &filter).await?;
    let groups = organize_by.map(|by| by.group(&rituals));
    Ok(Json(ListRitualsResponse { rituals, groups }))
}

/// Dashboard statistics over the rituals visible to a viewer.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RitualStats {
    pub total: usize,
    /// Count per degree; unlisted documents under `"unlisted"`.
    pub by_degree: BTreeMap<String, usize>,
}

impl RitualStats {
    pub fn from_rituals(rituals: &[Ritual]) -> Self {
        let mut by_degree = BTreeMap::new();
        for ritual in rituals {
            let key = match ritual.degree {
                Some(degree) => degree.to_string(),
                None => "unlisted".to_string(),
            };
            *by_degree.entry(key).or_insert(0) += 1;
        }
        Self {
            total: rituals.len(),
            by_degree,
        }
    }
}

/// GET /api/rituals/stats
pub async fn ritual_stats(
    State(state): State<AppState>,
    resolution: SessionResolution,
) -> ApiResult<Json<RitualStats>> {
    let viewer = require_profile(&state, &resolution).await?;
    let rituals = visible_rituals(&state, Some(&viewer), &RitualFilter::default()).await?;
    Ok(Json(RitualStats::from_rituals(&rituals)))
}

/// Outcome of looking up a single ritual for a viewer.
pub enum RitualAccess {
    Granted(Ritual),
    Denied,
    Unknown,
}

/// Look up a ritual and apply the access policy for `viewer`.
pub async fn ritual_for_viewer(state: &AppState, viewer: &Profile, id: &str) -> ApiResult<RitualAccess> {
    // Malformed ids are simply unknown.
    let Ok(id) = RitualId::parse(id) else {
        return Ok(RitualAccess::Unknown);
    };
    let Some(row) = state.metadata.get_ritual(*id.as_uuid()).await? else {
        return Ok(RitualAccess::Unknown);
    };
    let ritual = Ritual::from(row);
    if policy::can_access_document(viewer, &ritual) {
        Ok(RitualAccess::Granted(ritual))
    } else {
        Ok(RitualAccess::Denied)
    }
}

/// GET /api/rituals/{id}
pub async fn get_ritual(
    State(state): State<AppState>,
    resolution: SessionResolution,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let viewer = require_profile(&state, &resolution).await?;
    match ritual_for_viewer(&state, &viewer, &id).await? {
        RitualAccess::Granted(ritual) => Ok(Json(serde_json::json!({ "ritual": ritual }))),
        RitualAccess::Denied => Err(ApiError::Forbidden(
            "your degree does not grant access to this ritual".to_string(),
        )),
        RitualAccess::Unknown => Err(ApiError::NotFound(format!("ritual {id} not found"))),
    }
}

/// A binary stored in the object store.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub url: String,
    pub key: String,
    pub size: usize,
    pub content_type: String,
}

/// Store an uploaded binary under its ritual key.
pub async fn store_file(state: &AppState, degree: Option<i32>, file: &UploadedFile) -> ApiResult<StoredFile> {
    if file.data.is_empty() {
        return Err(ApiError::Validation(vec!["file".to_string()]));
    }
    let key = object_key(degree, &file.file_name, OffsetDateTime::now_utc());
    let content_type = file
        .content_type
        .clone()
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream")
        .unwrap_or_else(|| guess_content_type(&file.file_name).to_string());

    let started = Instant::now();
    state
        .storage
        .put(&key, file.data.clone(), Some(&content_type))
        .await?;
    metrics::UPLOAD_DURATION.observe(started.elapsed().as_secs_f64());
    metrics::RITUALS_UPLOADED.inc();
    metrics::BYTES_UPLOADED.inc_by(file.data.len() as u64);

    tracing::info!(key = %key, size = file.data.len(), content_type = %content_type, "binary stored");
    Ok(StoredFile {
        url: state.storage.public_url(&key),
        key,
        size: file.data.len(),
        content_type,
    })
}

/// POST /api/upload - Store a binary without creating a ritual.
pub async fn upload_file(
    State(state): State<AppState>,
    resolution: SessionResolution,
    multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let uploader = require_profile(&state, &resolution).await?;
    if !policy::can_upload_document(&uploader) {
        return Err(ApiError::Forbidden("uploads are not permitted".to_string()));
    }

    let form = read_upload_form(multipart, state.config.server.max_upload_size).await?;
    let degree = match form.field("degree") {
        Some(raw) => Some(
            parse_degree(&raw).ok_or_else(|| ApiError::Validation(vec!["degree".to_string()]))?,
        ),
        None => None,
    };
    let file = form
        .file
        .as_ref()
        .ok_or_else(|| ApiError::Validation(vec!["file".to_string()]))?;

    let stored = store_file(&state, degree, file).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "url": stored.url,
        "key": stored.key,
        "size": stored.size,
        "contentType": stored.content_type,
    })))
}

/// POST /api/rituals - Upload a binary and create its ritual.
pub async fn create_ritual(
    State(state): State<AppState>,
    resolution: SessionResolution,
    multipart: Multipart,
) -> ApiResult<Response> {
    let uploader = require_profile(&state, &resolution).await?;
    if !policy::can_upload_document(&uploader) {
        return Err(ApiError::Forbidden("uploads are not permitted".to_string()));
    }

    let form = read_upload_form(multipart, state.config.server.max_upload_size).await?;

    let mut invalid = Vec::new();
    let name = form.field("name");
    let degree = form.field("degree").and_then(|raw| parse_degree(&raw));
    let system = form.field("system");
    let language = form.field("language");
    let file = form.file.as_ref().filter(|f| !f.data.is_empty());
    for (field, missing) in [
        ("file", file.is_none()),
        ("name", name.is_none()),
        ("degree", degree.is_none()),
        ("system", system.is_none()),
        ("language", language.is_none()),
    ] {
        if missing {
            invalid.push(field.to_string());
        }
    }
    let (Some(file), Some(name), Some(degree), Some(system), Some(language)) =
        (file, name, degree, system, language)
    else {
        return Err(ApiError::Validation(invalid));
    };

    let stored = store_file(&state, Some(degree), file).await?;

    let now = OffsetDateTime::now_utc();
    let ritual = Ritual {
        id: RitualId::new(),
        name,
        degree: Some(degree),
        system,
        language,
        author: form.field("author").unwrap_or_else(|| uploader.name.clone()),
        file_url: stored.url,
        file_key: Some(stored.key.clone()),
        content_type: Some(stored.content_type),
        size: Some(stored.size as i64),
        owner_id: Some(uploader.id),
        created_at: now,
        updated_at: now,
    };

    if let Err(e) = state.metadata.create_ritual(&RitualRow::from(&ritual)).await {
        // The binary has no row pointing at it; drop it.
        if let Err(cleanup) = state.storage.delete(&stored.key).await {
            metrics::BINARY_CLEANUP_FAILURES.inc();
            tracing::warn!(key = %stored.key, error = %cleanup, "failed to remove orphaned binary");
        }
        return Err(e.into());
    }

    tracing::info!(ritual_id = %ritual.id, degree, owner = %uploader.id, "ritual created");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "ritual": ritual })),
    )
        .into_response())
}

/// DELETE /api/rituals/{id}
///
/// Removes the row, then the binary. A failed binary deletion is logged and
/// counted but does not fail the request.
pub async fn delete_ritual(
    State(state): State<AppState>,
    resolution: SessionResolution,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let admin = require_admin(&state, &resolution).await?;
    if !policy::can_delete_document(&admin) {
        return Err(ApiError::Forbidden("administrator role required".to_string()));
    }

    let ritual_id =
        RitualId::parse(&id).map_err(|_| ApiError::NotFound(format!("ritual {id} not found")))?;
    let row = state
        .metadata
        .get_ritual(*ritual_id.as_uuid())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("ritual {id} not found")))?;
    let ritual = Ritual::from(row);

    state.metadata.delete_ritual(*ritual_id.as_uuid()).await?;
    metrics::RITUALS_DELETED.inc();
    tracing::info!(ritual_id = %ritual.id, admin = %admin.id, "ritual deleted");

    let key = ritual
        .file_key
        .clone()
        .or_else(|| state.storage.key_for_url(&ritual.file_url));
    match key {
        Some(key) => {
            if let Err(e) = state.storage.delete(&key).await {
                metrics::BINARY_CLEANUP_FAILURES.inc();
                tracing::warn!(ritual_id = %ritual.id, key = %key, error = %e, "binary deletion failed");
            }
        }
        None => {
            metrics::BINARY_CLEANUP_FAILURES.inc();
            tracing::warn!(
                ritual_id = %ritual.id,
                file_url = %ritual.file_url,
                "no object key for ritual binary, leaving it in place"
            );
        }
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tyler_core::UserId;

    fn ritual(degree: Option<i32>) -> Ritual {
        let now = OffsetDateTime::now_utc();
        Ritual {
            id: RitualId::new(),
            name: "Opening".into(),
            degree,
            system: "York".into(),
            language: "English".into(),
            author: "Anon".into(),
            file_url: "/files/x".into(),
            file_key: None,
            content_type: None,
            size: None,
            owner_id: Some(UserId::new()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_query_parse() {
        let query = ListRitualsQuery {
            degree: Some("2".into()),
            system: Some("York".into()),
            language: Some("".into()),
            organize_by: Some("system".into()),
        };
        let (filter, organize_by) = query.parse().unwrap();
        assert_eq!(filter.degree, Some(2));
        assert_eq!(filter.system.as_deref(), Some("York"));
        assert!(filter.language.is_none());
        assert_eq!(organize_by, Some(OrganizeBy::System));
    }

    #[test]
    fn test_query_parse_rejects_bad_values() {
        let bad_degree = ListRitualsQuery {
            degree: Some("zero".into()),
            ..Default::default()
        };
        assert!(matches!(bad_degree.parse(), Err(ApiError::Validation(_))));

        let bad_grouping = ListRitualsQuery {
            organize_by: Some("colour".into()),
            ..Default::default()
        };
        assert!(matches!(bad_grouping.parse(), Err(ApiError::Core(_))));
    }

    #[test]
    fn test_stats_count_per_degree() {
        let stats =
            RitualStats::from_rituals(&[ritual(Some(1)), ritual(Some(1)), ritual(Some(3)), ritual(None)]);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.by_degree.get("1"), Some(&2));
        assert_eq!(stats.by_degree.get("3"), Some(&1));
        assert_eq!(stats.by_degree.get("unlisted"), Some(&1));
    }
}
