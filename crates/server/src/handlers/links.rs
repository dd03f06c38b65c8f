//! Public link lookup.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use parcel_core::domain::public_url;
use parcel_metadata::models::UploadRow;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::Serialize;
use time::OffsetDateTime;

/// Characters escaped inside one storage key path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Public view of a completed upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResponse {
    pub slug: String,
    pub filename: String,
    pub size: i64,
    #[serde(rename = "type")]
    pub content_type: String,
    pub domain: String,
    pub public_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl From<UploadRow> for LinkResponse {
    fn from(row: UploadRow) -> Self {
        Self {
            public_url: public_url(&row.domain, &row.slug),
            slug: row.slug,
            filename: row.filename,
            size: row.size,
            content_type: row.content_type,
            domain: row.domain,
            uploaded_at: row.uploaded_at,
            expires_at: row.expires_at,
        }
    }
}

/// GET /{slug}
///
/// Redirects to the stored object when `server.public_base_url` is set,
/// otherwise describes the upload as JSON. Uploads still being written are
/// reported as missing.
#[tracing::instrument(skip(state), fields(slug = %slug))]
pub async fn resolve_link(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Response> {
    if slug.is_empty() || !slug.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(ApiError::NotFound(format!("link {slug}")));
    }

    let row = state
        .metadata
        .get_upload_by_slug(&slug)
        .await?
        .filter(UploadRow::is_committed)
        .ok_or_else(|| ApiError::NotFound(format!("link {slug}")))?;

    if row.is_expired(OffsetDateTime::now_utc()) {
        return Err(ApiError::Gone);
    }

    match state.config.server.public_base_url.as_deref() {
        Some(base) => {
            let location = object_url(base, &row.storage_key);
            let value = HeaderValue::from_str(&location)
                .map_err(|e| ApiError::Internal(format!("invalid redirect location: {e}")))?;
            Ok((StatusCode::TEMPORARY_REDIRECT, [(LOCATION, value)]).into_response())
        }
        None => Ok(Json(LinkResponse::from(row)).into_response()),
    }
}

/// `{base}/{key}` with every key segment percent-encoded.
fn object_url(base: &str, key: &str) -> String {
    let encoded: Vec<String> = key
        .split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect();
    format!("{}/{}", base.trim_end_matches('/'), encoded.join("/"))
}
